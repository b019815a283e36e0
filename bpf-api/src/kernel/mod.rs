//! Kernel interface
//!
//! The loader never issues system calls itself. It drives a [`Kernel`]
//! implementation that turns a [`CollectionSpec`] into live objects, and it
//! reads specs through a [`SpecReader`]. Both sit at the boundary so the
//! normalization and load logic can be exercised without a kernel.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{AssignError, KernelError, ObjectKind};
use crate::spec::{CollectionSpec, MapFlags, MapSpec, MapType};

/// Default starting size of the verifier log buffer.
pub const DEFAULT_LOG_SIZE: u32 = 4 * 1024 * 1024;

/// Map creation options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapOptions {
    /// Directory on the pin filesystem holding pins of maps marked
    /// [`crate::spec::PinType::BY_NAME`].
    pub pin_path: Option<PathBuf>,
}

/// Program load options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramOptions {
    /// Verifier log level handed to the kernel.
    pub log_level: u32,
    /// Starting size of the verifier log buffer in bytes.
    pub log_size: u32,
    /// Don't request a verifier log at all.
    pub log_disabled: bool,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            log_level: 0,
            log_size: DEFAULT_LOG_SIZE,
            log_disabled: false,
        }
    }
}

/// Options passed through to the [`Kernel`] on every load.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelOptions {
    pub maps: MapOptions,
    pub programs: ProgramOptions,
}

/// Properties of a map that already exists in the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapInfo {
    pub ty: MapType,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub flags: MapFlags,
}

impl From<&MapSpec> for MapInfo {
    fn from(spec: &MapSpec) -> Self {
        Self {
            ty: spec.ty,
            key_size: spec.key_size,
            value_size: spec.value_size,
            max_entries: spec.max_entries,
            flags: spec.flags,
        }
    }
}

/// A live map.
pub trait MapHandle: Sized {
    /// Pins the map at `path`. Fails if something is already pinned there.
    fn pin(&self, path: &Path) -> Result<(), KernelError>;

    /// Returns a second handle to the same kernel map.
    fn try_clone(&self) -> Result<Self, KernelError>;
}

/// Creates kernel objects from specifications.
pub trait Kernel {
    type Map: MapHandle;
    type Program;

    /// Creates every map and program of `spec`, reusing maps pinned by name
    /// under `opts.maps.pin_path`.
    ///
    /// Must fail with [`KernelError::MapIncompatible`] when a pinned map
    /// doesn't match its spec, and with [`KernelError::Verifier`] when a
    /// program is rejected. Objects created before the failure are released.
    fn load_collection(
        &self,
        spec: &CollectionSpec,
        opts: &KernelOptions,
    ) -> Result<Collection<Self::Map, Self::Program>, KernelError>;

    /// Describes the map pinned at `path`, or `None` if nothing is pinned
    /// there.
    fn load_pinned_map(&self, path: &Path) -> Result<Option<MapInfo>, KernelError>;
}

/// Reads a compiled bundle into a [`CollectionSpec`].
pub trait SpecReader {
    type Error: std::error::Error + Send + Sync + 'static;

    fn read_spec(&self, path: &Path) -> Result<CollectionSpec, Self::Error>;
}

/// Live maps and programs created from one [`CollectionSpec`], keyed by the
/// spec's names.
#[derive(Debug)]
pub struct Collection<M, P> {
    pub maps: HashMap<String, M>,
    pub programs: HashMap<String, P>,
}

impl<M, P> Default for Collection<M, P> {
    fn default() -> Self {
        Self {
            maps: HashMap::new(),
            programs: HashMap::new(),
        }
    }
}

impl<M, P> Collection<M, P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&self, name: &str) -> Option<&M> {
        self.maps.get(name)
    }

    pub fn program(&self, name: &str) -> Option<&P> {
        self.programs.get(name)
    }

    /// Moves a map out of the collection.
    pub fn take_map(&mut self, name: &str) -> Result<M, AssignError> {
        self.maps.remove(name).ok_or_else(|| AssignError::Missing {
            kind: ObjectKind::Map,
            name: name.to_string(),
        })
    }

    /// Moves a program out of the collection.
    pub fn take_program(&mut self, name: &str) -> Result<P, AssignError> {
        self.programs.remove(name).ok_or_else(|| AssignError::Missing {
            kind: ObjectKind::Program,
            name: name.to_string(),
        })
    }
}

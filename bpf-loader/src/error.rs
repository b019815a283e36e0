//! Loader errors

use std::path::PathBuf;

use bpf_api::error::{AssignError, KernelError, SpecError, VariableError};
use thiserror::Error;

/// Every way normalizing or loading a collection can fail. Nothing is
/// retried at this level except where noted in [`crate::collection`].
#[derive(Debug, Error)]
pub enum LoadError {
    /// The external reader failed
    #[error("reading collection spec from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// Two tail call programs claim the same slot of the calls map
    #[error("duplicate tail call index {0}")]
    DuplicateTailCall(u32),
    /// A static tail call into the calls map has no program at its slot
    #[error(
        "program '{section}'/'{program}' executes tail call to unknown index '{index}' at {instruction}, potential missed tailcall"
    )]
    UnknownTailCall {
        section: String,
        program: String,
        index: i64,
        instruction: usize,
    },

    /// A legacy map definition trailer couldn't be decoded
    #[error("reading iproute2 map definition of map {map}: {reason}")]
    LegacyMapDefinition { map: String, reason: String },
    #[error("maps {first} and {second} have duplicate iproute2 map ID {id}")]
    DuplicateMapId { first: String, second: String, id: u32 },
    #[error("no map with iproute2 map .id {0}")]
    UnknownMapId(u32),

    #[error("unable to classify program types")]
    Unclassified,

    #[error("unknown map {name:?}: can't rename to {rename:?}")]
    UnknownMapRename { name: String, rename: String },

    /// The constants couldn't be flattened into named fields
    #[error("converting constants to fields: {0}")]
    Constants(String),
    #[error("can't set non-existent Variable {0}")]
    UnknownVariable(String),
    #[error("can only set config variables in section {expected} (got {section}:{name})")]
    MisplacedVariable {
        expected: &'static str,
        section: String,
        name: String,
    },
    #[error("setting Variable {name}: {source}")]
    SetVariable {
        name: String,
        #[source]
        source: VariableError,
    },

    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("finding incompatible maps: {0}")]
    IncompatibleMaps(#[source] KernelError),
    #[error("{0} requires a map pin path in the kernel options")]
    MissingPinPath(&'static str),
    #[error("collecting map pins to replace: map {0} not found in collection")]
    MapNotInCollection(String),
    #[error("collecting map pins to replace: {0}")]
    CloneMap(#[source] KernelError),
    #[error("removing previous pin at {}: {source}", .path.display())]
    RemovePin {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pinning map {map} to {}: {source}", .path.display())]
    Pin {
        map: String,
        path: PathBuf,
        #[source]
        source: KernelError,
    },

    /// Any load failure, as reported by [`crate::load_and_assign`]
    #[error("loading eBPF collection into the kernel: {0}")]
    Load(#[source] Box<LoadError>),
    #[error("assigning eBPF objects to {target}: {source}")]
    Assign {
        target: &'static str,
        #[source]
        source: AssignError,
    },
}

impl LoadError {
    /// Returns the verifier error behind this failure, if any.
    pub fn verifier(&self) -> Option<&bpf_api::VerifierError> {
        match self {
            LoadError::Kernel(err) => err.as_verifier(),
            LoadError::Load(inner) => inner.verifier(),
            _ => None,
        }
    }
}

/// Result type for loader operations
pub type Result<T> = core::result::Result<T, LoadError>;

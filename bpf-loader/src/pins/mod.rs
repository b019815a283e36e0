//! Map pin replacement
//!
//! A map pinned by name is normally reused across loads. Two cases call for
//! a fresh map instead, whose pin then has to replace the old one:
//!
//! - the map carries the [`PIN_REPLACE`] marker, asking for a new map on
//!   every load;
//! - the pinned map no longer matches the spec, e.g. after an upgrade
//!   changed its size.
//!
//! Replacing the pin right away would expose the new, still unused map to
//! anyone opening the pin while the old programs are still attached. The pins
//! are therefore collected into a [`Commit`] that the caller runs once the
//! new programs are attached.

use std::io;
use std::path::{Path, PathBuf};

use bpf_api::kernel::{Collection, Kernel, KernelOptions, MapHandle};
use bpf_api::spec::{CollectionSpec, PinType};

use crate::error::{LoadError, Result};

/// Asks for the map to be created anew on every load and its pin replaced
/// on commit. Only meaningful to this loader; the kernel library rejects it.
pub const PIN_REPLACE: PinType = PinType(1 << 4);

/// Strips the [`PIN_REPLACE`] marker from all maps, returning their keys.
pub fn consume_pin_replace(spec: &mut CollectionSpec) -> Vec<String> {
    let mut to_replace = Vec::new();
    for (key, m) in spec.maps.iter_mut() {
        if m.pinning == PIN_REPLACE {
            m.pinning = PinType::NONE;
            to_replace.push(key.clone());
        }
    }
    to_replace.sort_unstable();
    to_replace
}

/// Finds maps pinned by name whose existing pin doesn't match their spec,
/// and unpins them in the spec so a fresh map gets created. Returns their
/// keys.
pub fn incompatible_maps<K: Kernel>(
    kernel: &K,
    spec: &mut CollectionSpec,
    opts: &KernelOptions,
) -> Result<Vec<String>> {
    let pin_path = opts
        .maps
        .pin_path
        .as_deref()
        .ok_or(LoadError::MissingPinPath("finding incompatible maps"))?;

    let mut incompatible = Vec::new();
    for (key, ms) in spec.maps.iter_mut() {
        if ms.pinning != PinType::BY_NAME {
            continue;
        }

        let path = pin_path.join(&ms.name);
        let Some(info) = kernel
            .load_pinned_map(&path)
            .map_err(LoadError::IncompatibleMaps)?
        else {
            continue;
        };

        if let Err(reason) = ms.compatible(&info) {
            log::debug!(
                "map {} incompatible with pin at {}: {}",
                ms.name,
                path.display(),
                reason
            );
            ms.pinning = PinType::NONE;
            incompatible.push(key.clone());
        }
    }
    incompatible.sort_unstable();
    Ok(incompatible)
}

/// A pin to be replaced on commit.
#[derive(Debug)]
struct PendingPin<M> {
    key: String,
    path: PathBuf,
    map: M,
}

/// Pins to replace once the collection's entrypoints are attached.
///
/// Holds its own handles, so it keeps working after maps were moved out of
/// the collection.
#[derive(Debug)]
#[must_use = "pins are only replaced when commit() is called"]
pub struct Commit<M> {
    pins: Vec<PendingPin<M>>,
}

impl<M> Default for Commit<M> {
    fn default() -> Self {
        Self { pins: Vec::new() }
    }
}

impl<M: MapHandle> Commit<M> {
    /// Keys of the maps whose pins will be replaced.
    pub fn maps(&self) -> impl Iterator<Item = &str> {
        self.pins.iter().map(|p| p.key.as_str())
    }

    /// Pin paths that will be replaced.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.pins.iter().map(|p| p.path.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Replaces every pending pin, removing whatever is pinned at the path
    /// first.
    ///
    /// Call only after all entrypoints of the collection are attached; when
    /// attaching several programs in a loop, after the loop.
    pub fn commit(self) -> Result<()> {
        for pin in self.pins {
            match std::fs::remove_file(&pin.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(LoadError::RemovePin {
                        path: pin.path,
                        source,
                    });
                }
            }

            pin.map.pin(&pin.path).map_err(|source| LoadError::Pin {
                map: pin.key.clone(),
                path: pin.path.clone(),
                source,
            })?;

            log::info!("Repinned map {} at {}", pin.key, pin.path.display());
        }
        Ok(())
    }
}

/// Resolves map keys to live handles and their pin paths.
///
/// The pin path uses the spec's map name, which differs from the key after a
/// rename.
pub fn maps_to_replace<M: MapHandle, P>(
    to_replace: &[String],
    spec: &CollectionSpec,
    coll: &Collection<M, P>,
    opts: &KernelOptions,
) -> Result<Commit<M>> {
    if to_replace.is_empty() {
        return Ok(Commit::default());
    }

    let pin_path = opts
        .maps
        .pin_path
        .as_deref()
        .ok_or(LoadError::MissingPinPath("replacing map pins"))?;

    let mut pins = Vec::with_capacity(to_replace.len());
    for key in to_replace {
        let (Some(m), Some(ms)) = (coll.map(key), spec.maps.get(key)) else {
            return Err(LoadError::MapNotInCollection(key.clone()));
        };

        pins.push(PendingPin {
            key: key.clone(),
            path: pin_path.join(&ms.name),
            map: m.try_clone().map_err(LoadError::CloneMap)?,
        });
    }

    Ok(Commit { pins })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpf_api::error::KernelError;
    use bpf_api::kernel::MapInfo;
    use bpf_api::spec::{MapSpec, MapType};
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct PinnedMaps {
        pinned: HashMap<PathBuf, MapInfo>,
        lookups: RefCell<Vec<PathBuf>>,
    }

    impl Kernel for PinnedMaps {
        type Map = FileMap;
        type Program = ();

        fn load_collection(
            &self,
            _spec: &CollectionSpec,
            _opts: &KernelOptions,
        ) -> std::result::Result<Collection<FileMap, ()>, KernelError> {
            Ok(Collection::new())
        }

        fn load_pinned_map(&self, path: &Path) -> std::result::Result<Option<MapInfo>, KernelError> {
            self.lookups.borrow_mut().push(path.to_path_buf());
            Ok(self.pinned.get(path).cloned())
        }
    }

    /// Pins by writing a marker file, like a pin on bpffs shows up as a file.
    #[derive(Debug)]
    struct FileMap(u32);

    impl MapHandle for FileMap {
        fn pin(&self, path: &Path) -> std::result::Result<(), KernelError> {
            std::fs::write(path, self.0.to_string()).map_err(|source| KernelError::Pin {
                op: "pin",
                path: path.to_path_buf(),
                source,
            })
        }

        fn try_clone(&self) -> std::result::Result<Self, KernelError> {
            Ok(FileMap(self.0))
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bpf-loader-pins-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn opts(pin_path: &Path) -> KernelOptions {
        let mut opts = KernelOptions::default();
        opts.maps.pin_path = Some(pin_path.to_path_buf());
        opts
    }

    #[test]
    fn test_consume_pin_replace() {
        let mut spec = CollectionSpec::default();
        let mut a = MapSpec::new("a", MapType::Hash, 4, 4, 1);
        a.pinning = PIN_REPLACE;
        let mut b = MapSpec::new("b", MapType::Hash, 4, 4, 1);
        b.pinning = PinType::BY_NAME;
        spec.insert_map(a).unwrap();
        spec.insert_map(b).unwrap();

        assert_eq!(consume_pin_replace(&mut spec), vec!["a".to_string()]);
        assert_eq!(spec.maps["a"].pinning, PinType::NONE);
        assert_eq!(spec.maps["b"].pinning, PinType::BY_NAME);
        assert!(consume_pin_replace(&mut spec).is_empty());
    }

    #[test]
    fn test_incompatible_maps() {
        let mut spec = CollectionSpec::default();
        for name in ["same", "grown", "absent"] {
            let mut m = MapSpec::new(name, MapType::Hash, 4, 8, 1024);
            m.pinning = PinType::BY_NAME;
            spec.insert_map(m).unwrap();
        }
        spec.insert_map(MapSpec::new("unpinned", MapType::Hash, 4, 8, 1)).unwrap();

        let root = Path::new("/sys/fs/bpf/tc/globals");
        let mut kernel = PinnedMaps::default();
        kernel
            .pinned
            .insert(root.join("same"), MapInfo::from(&spec.maps["same"]));
        let mut old = MapInfo::from(&spec.maps["grown"]);
        old.max_entries = 512;
        kernel.pinned.insert(root.join("grown"), old);

        let found = incompatible_maps(&kernel, &mut spec, &opts(root)).unwrap();
        assert_eq!(found, vec!["grown".to_string()]);
        assert_eq!(spec.maps["grown"].pinning, PinType::NONE);
        assert_eq!(spec.maps["same"].pinning, PinType::BY_NAME);
        assert!(!kernel.lookups.borrow().contains(&root.join("unpinned")));
    }

    #[test]
    fn test_incompatible_maps_needs_pin_path() {
        let mut spec = CollectionSpec::default();
        let kernel = PinnedMaps::default();
        assert!(matches!(
            incompatible_maps(&kernel, &mut spec, &KernelOptions::default()),
            Err(LoadError::MissingPinPath(_))
        ));
    }

    #[test]
    fn test_commit_replaces_pins() {
        let dir = scratch_dir("commit");
        let mut spec = CollectionSpec::default();
        spec.insert_map(MapSpec::new("cilium_calls", MapType::ProgramArray, 4, 4, 64))
            .unwrap();
        spec.maps.get_mut("cilium_calls").unwrap().name = "cilium_calls_00042".into();

        let mut coll: Collection<FileMap, ()> = Collection::new();
        coll.maps.insert("cilium_calls".into(), FileMap(7));

        std::fs::write(dir.join("cilium_calls_00042"), "old").unwrap();

        let commit = maps_to_replace(&["cilium_calls".to_string()], &spec, &coll, &opts(&dir))
            .unwrap();
        assert_eq!(commit.maps().collect::<Vec<_>>(), vec!["cilium_calls"]);

        // the commit holds its own handle
        drop(coll.take_map("cilium_calls").unwrap());

        commit.commit().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.join("cilium_calls_00042")).unwrap(),
            "7"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_maps_to_replace_errors() {
        let spec = CollectionSpec::default();
        let coll: Collection<FileMap, ()> = Collection::new();
        let keys = vec!["gone".to_string()];

        assert!(matches!(
            maps_to_replace(&keys, &spec, &coll, &KernelOptions::default()),
            Err(LoadError::MissingPinPath(_))
        ));
        assert!(matches!(
            maps_to_replace(&keys, &spec, &coll, &opts(Path::new("/sys/fs/bpf"))),
            Err(LoadError::MapNotInCollection(k)) if k == "gone"
        ));
        assert!(maps_to_replace(&[], &spec, &coll, &KernelOptions::default())
            .unwrap()
            .is_empty());
    }
}

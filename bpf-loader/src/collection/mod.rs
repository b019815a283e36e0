//! Collection loading
//!
//! Loading a bundle happens in two stages:
//!
//! 1. [`load_collection_spec`] reads the bundle and normalizes it once: tail
//!    calls nothing can reach are dropped, iproute2 map definitions are
//!    translated and every program gets a type.
//! 2. [`load_collection`] turns a normalized spec into kernel objects. It
//!    works on its own copy of the spec, so one normalized spec can back any
//!    number of loads with different options.
//!
//! Maps whose pins have to be replaced are not repinned during the load.
//! They come back as a [`Commit`] to run once the programs are attached.

use std::collections::BTreeMap;
use std::path::Path;

use bpf_api::error::AssignError;
use bpf_api::kernel::{Collection, Kernel, KernelOptions, SpecReader};
use bpf_api::spec::CollectionSpec;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::classify::classify_program_types;
use crate::compat::iproute2_compat;
use crate::constants::{Constants, apply_constants};
use crate::error::{LoadError, Result};
use crate::pins::{Commit, consume_pin_replace, incompatible_maps, maps_to_replace};
use crate::tailcall::remove_unreachable_tailcalls;
use crate::verifier::with_log_retry;

/// Per-load options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionOptions {
    /// Passed through to the kernel on every load attempt.
    pub kernel: KernelOptions,
    /// Values for the bundle's configuration variables.
    pub constants: Option<Constants>,
    /// Map key to the name the map is created (and pinned) under.
    pub map_renames: BTreeMap<String, String>,
}

/// Reads a bundle and normalizes it for loading.
pub fn load_collection_spec<R: SpecReader>(reader: &R, path: &Path) -> Result<CollectionSpec> {
    let mut spec = reader.read_spec(path).map_err(|e| LoadError::Read {
        path: path.to_path_buf(),
        source: Box::new(e),
    })?;

    normalize(&mut spec)?;
    Ok(spec)
}

/// Prepares a freshly read spec for loading.
pub fn normalize(spec: &mut CollectionSpec) -> Result<()> {
    let removed = remove_unreachable_tailcalls(spec)?;
    if !removed.is_empty() {
        log::debug!("Removed {} unreachable tail calls", removed.len());
    }

    iproute2_compat(spec)?;

    let ty = classify_program_types(spec)?;
    log::debug!("Classified bundle programs as {}", ty);

    Ok(())
}

/// Renames maps in place. The map keeps its key; only the name the kernel
/// sees changes.
pub fn rename_maps(spec: &mut CollectionSpec, renames: &BTreeMap<String, String>) -> Result<()> {
    for (name, rename) in renames {
        let m = spec
            .maps
            .get_mut(name)
            .ok_or_else(|| LoadError::UnknownMapRename {
                name: name.clone(),
                rename: rename.clone(),
            })?;
        log::debug!("Renaming map {} to {}", name, rename);
        m.name = rename.clone();
    }
    Ok(())
}

/// Loads a normalized spec into the kernel.
///
/// `spec` is left untouched. If the load fails because maps pinned by name
/// no longer match their spec, those maps are recreated unpinned and the
/// load is retried once; they, along with maps marked
/// [`crate::pins::PIN_REPLACE`], end up in the returned [`Commit`].
///
/// The commit must run only after all entrypoints of the collection are
/// attached to their hooks. Running it earlier exposes the new maps through
/// their pins while the old programs still use the old ones.
pub fn load_collection<K: Kernel>(
    kernel: &K,
    spec: &CollectionSpec,
    opts: &CollectionOptions,
) -> Result<(Collection<K::Map, K::Program>, Commit<K::Map>)> {
    let mut spec = spec.clone();

    rename_maps(&mut spec, &opts.map_renames)?;
    apply_constants(&mut spec, opts.constants.as_ref())?;

    // The kernel library doesn't know the replace marker and would reject
    // the whole collection.
    let mut to_replace = consume_pin_replace(&mut spec);

    let first = with_log_retry(&opts.kernel, |kopts| kernel.load_collection(&spec, kopts));
    let coll = match first {
        Ok(coll) => coll,
        Err(err) if err.is_map_incompatible() => {
            log::warn!("Found incompatible map pins, recreating the affected maps: {}", err);

            let seen: HashSet<String> = to_replace.iter().cloned().collect();
            for key in incompatible_maps(kernel, &mut spec, &opts.kernel)? {
                if !seen.contains(&key) {
                    to_replace.push(key);
                }
            }
            to_replace.sort_unstable();

            with_log_retry(&opts.kernel, |kopts| kernel.load_collection(&spec, kopts))?
        }
        Err(err) => return Err(err.into()),
    };

    // Resolve handles now; callers may move maps out of the collection
    // before committing.
    let commit = maps_to_replace(&to_replace, &spec, &coll, &opts.kernel)?;

    Ok((coll, commit))
}

/// A caller-defined set of kernel objects, bound by name from a loaded
/// collection.
pub trait CollectionTarget<M, P> {
    /// Moves the objects this target needs out of `coll`.
    fn assign_from(&mut self, coll: &mut Collection<M, P>) -> core::result::Result<(), AssignError>;
}

/// Loads `spec` and binds its objects into `target`.
///
/// A verifier rejection is logged together with the full verifier log.
/// Objects the target doesn't take are released on return.
pub fn load_and_assign<K, T>(
    kernel: &K,
    target: &mut T,
    spec: &CollectionSpec,
    opts: &CollectionOptions,
) -> Result<Commit<K::Map>>
where
    K: Kernel,
    T: CollectionTarget<K::Map, K::Program>,
{
    let (mut coll, commit) = load_collection(kernel, spec, opts).map_err(|err| {
        if let Some(verr) = err.verifier() {
            log::error!("Verifier error: {:#}", verr);
        }
        LoadError::Load(Box::new(err))
    })?;

    target
        .assign_from(&mut coll)
        .map_err(|source| LoadError::Assign {
            target: std::any::type_name::<T>(),
            source,
        })?;

    Ok(commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpf_api::spec::{MapSpec, MapType};

    #[test]
    fn test_rename_keeps_key() {
        let mut spec = CollectionSpec::default();
        spec.insert_map(MapSpec::new("cilium_calls", MapType::ProgramArray, 4, 4, 64))
            .unwrap();

        let renames = BTreeMap::from([("cilium_calls".to_string(), "cilium_calls_00042".to_string())]);
        rename_maps(&mut spec, &renames).unwrap();
        assert_eq!(spec.maps["cilium_calls"].name, "cilium_calls_00042");
    }

    #[test]
    fn test_rename_unknown_map() {
        let mut spec = CollectionSpec::default();
        let renames = BTreeMap::from([("nope".to_string(), "other".to_string())]);
        let err = rename_maps(&mut spec, &renames).unwrap_err();
        assert_eq!(err.to_string(), r#"unknown map "nope": can't rename to "other""#);
    }

    #[test]
    fn test_options_from_json() {
        let opts: CollectionOptions = serde_json::from_str(
            r#"{
                "kernel": {"maps": {"pin_path": "/sys/fs/bpf/tc/globals"}},
                "constants": {"interface_ifindex": 4},
                "map_renames": {"cilium_calls": "cilium_calls_00042"}
            }"#,
        )
        .unwrap();

        assert_eq!(
            opts.constants,
            Some(Constants::new().set("interface_ifindex", 4))
        );
        assert_eq!(opts.map_renames["cilium_calls"], "cilium_calls_00042");
        assert!(opts.kernel.maps.pin_path.is_some());
    }
}

//! BPF Loader - Normalizes compiled BPF collections and loads them
//!
//! This crate sits between the parser of a compiled bundle and the kernel.
//! It prunes tail calls nothing can reach, translates iproute2 map
//! conventions, gives every program a type, writes configuration constants
//! and drives the kernel load, replacing stale map pins afterwards.
//!
//! # Architecture
//!
//! - **Tailcall**: static tail call matcher and reachability pruning
//! - **Compat**: iproute2 map definitions and `<id>/<slot>` sections
//! - **Classify**: program type inference from entrypoint names
//! - **Constants**: configuration variables in `.rodata.config`
//! - **Pins**: pin replacement and the deferred [`Commit`]
//! - **Verifier**: verifier log buffer sizing
//! - **Collection**: the load pipeline tying the above together
//!
//! # Usage
//!
//! ```rust,ignore
//! let spec = bpf_loader::load_collection_spec(&reader, Path::new("bpf_lxc.o"))?;
//!
//! let opts = CollectionOptions {
//!     constants: Some(Constants::new().set("interface_ifindex", 4)),
//!     ..Default::default()
//! };
//! let (coll, commit) = bpf_loader::load_collection(&kernel, &spec, &opts)?;
//!
//! // attach every entrypoint first
//! attach(&coll)?;
//! commit.commit()?;
//! ```

pub mod classify;
pub mod collection;
pub mod compat;
pub mod constants;
pub mod error;
pub mod pins;
pub mod tailcall;
pub mod verifier;

// Re-export commonly used items
pub use collection::{
    CollectionOptions, CollectionTarget, load_and_assign, load_collection, load_collection_spec,
    normalize,
};
pub use constants::Constants;
pub use error::{LoadError, Result};
pub use pins::{Commit, PIN_REPLACE};

//! BPF API - Collection specification model and kernel interfaces
//!
//! This crate provides the types shared by every stage of the BPF loader: the
//! decoded instruction stream, the in-memory blueprint of a compiled bundle,
//! and the narrow interface through which the loader talks to the kernel.
//!
//! # Architecture
//!
//! The API is organized into several key modules:
//!
//! - **Asm**: Fixed-width instruction encoding and the opcodes the loader inspects
//! - **Spec**: Program, map and variable specifications of a collection
//! - **Kernel**: Kernel-facing traits, load options and the live object collection
//! - **Error**: Common error types shared with the loader
//!
//! # Usage
//!
//! ```rust
//! use bpf_api::asm::{Instruction, Register};
//! use bpf_api::spec::{CollectionSpec, ProgramSpec, ProgramType};
//!
//! let mut spec = CollectionSpec::default();
//! spec.insert_program(ProgramSpec::new(
//!     "cil_from_container",
//!     "tc",
//!     ProgramType::SchedCls,
//!     vec![Instruction::mov64_imm(Register::R0, 0), Instruction::exit()],
//! ))
//! .unwrap();
//! assert!(spec.programs.contains_key("cil_from_container"));
//! ```

pub mod asm;
pub mod error;
pub mod kernel;
pub mod spec;

// Re-export commonly used items
pub use asm::{Instruction, Instructions, OpCode, Register};
pub use error::{AssignError, KernelError, ObjectKind, SpecError, VariableError, VerifierError};
pub use kernel::{
    Collection, Kernel, KernelOptions, MapHandle, MapInfo, MapOptions, ProgramOptions, SpecReader,
};
pub use spec::{
    CollectionSpec, Endianness, MapFlags, MapKV, MapSpec, MapType, MapValue, PinType,
    ProgramSpec, ProgramType, VariableSpec, VariableType,
};

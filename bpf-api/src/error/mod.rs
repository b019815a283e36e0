//! Error types shared by the BPF API and the loader

use core::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::spec::VariableType;

/// Errors raised while building or decoding a collection specification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    /// A program with the same name is already part of the collection
    #[error("duplicate program {0}")]
    DuplicateProgram(String),
    /// A map with the same name is already part of the collection
    #[error("duplicate map {0}")]
    DuplicateMap(String),
    /// A variable with the same name is already part of the collection
    #[error("duplicate variable {0}")]
    DuplicateVariable(String),
    /// The raw instruction stream ends in the middle of an instruction
    #[error("truncated instruction at byte offset {0}")]
    TruncatedInstruction(usize),
    /// A 64-bit immediate load is missing its second half
    #[error("incomplete 64-bit immediate load at byte offset {0}")]
    IncompleteLoadImm64(usize),
}

/// Errors raised when a value is written into a [`crate::spec::VariableSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariableError {
    /// The value's JSON kind can't be stored in the variable's type
    #[error("variable {variable}: can't store {value} in {expected}")]
    TypeMismatch {
        variable: String,
        expected: VariableType,
        value: String,
    },
    /// The value does not fit in the variable's width
    #[error("variable {variable}: value {value} out of range for {ty}")]
    OutOfRange {
        variable: String,
        ty: VariableType,
        value: String,
    },
}

/// Kind of live kernel object held by a [`crate::kernel::Collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Map,
    Program,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Map => write!(f, "map"),
            ObjectKind::Program => write!(f, "program"),
        }
    }
}

/// Errors raised while moving objects out of a live collection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignError {
    /// The requested object is not (or no longer) part of the collection
    #[error("missing {kind} {name}")]
    Missing { kind: ObjectKind, name: String },
}

/// A program rejected by the kernel verifier, carrying the verifier's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierError {
    /// Name of the rejected program
    pub program: String,
    /// Verifier log, one entry per line
    pub log: Vec<String>,
    /// Set when the log buffer was too small to hold the whole log
    pub truncated: bool,
}

impl VerifierError {
    pub fn new(program: impl Into<String>, log: Vec<String>, truncated: bool) -> Self {
        Self {
            program: program.into(),
            log,
            truncated,
        }
    }
}

impl fmt::Display for VerifierError {
    /// The default form names the program and the last log line, which is
    /// where the verifier states its verdict. `{:#}` prints the whole log.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load program {}: verifier rejected program", self.program)?;
        if f.alternate() {
            for line in &self.log {
                write!(f, "\n\t{}", line)?;
            }
        } else if let Some(last) = self.log.iter().rev().find(|l| !l.trim().is_empty()) {
            write!(f, ": {}", last)?;
        }
        if self.truncated {
            write!(f, " (truncated)")?;
        }
        Ok(())
    }
}

impl std::error::Error for VerifierError {}

/// Errors reported by a [`crate::kernel::Kernel`] implementation.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A map pinned on the pin filesystem doesn't match its specification
    #[error("map {name}: pinned map is incompatible with its spec: {reason}")]
    MapIncompatible { name: String, reason: String },
    /// The verifier rejected a program
    #[error(transparent)]
    Verifier(#[from] VerifierError),
    /// A pin filesystem operation failed
    #[error("{op} {}: {source}", .path.display())]
    Pin {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Any other rejection by the kernel
    #[error("{op}: {reason}")]
    Rejected { op: String, reason: String },
}

impl KernelError {
    /// Returns true if a pinned map conflicts with the requested spec.
    pub fn is_map_incompatible(&self) -> bool {
        matches!(self, KernelError::MapIncompatible { .. })
    }

    /// Returns the verifier error, if this is one.
    pub fn as_verifier(&self) -> Option<&VerifierError> {
        match self {
            KernelError::Verifier(ve) => Some(ve),
            _ => None,
        }
    }
}

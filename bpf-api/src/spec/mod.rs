//! Collection specifications
//!
//! A [`CollectionSpec`] is the blueprint of a compiled bundle before anything
//! is created in the kernel. It is produced by an external reader, normalized
//! in place by the loader, and copied before every load so one normalized
//! spec can seed any number of independent loads.

mod map;
mod variable;

pub use map::{MapFlags, MapKV, MapSpec, MapType, MapValue, PinType};
pub use variable::{VariableSpec, VariableType};

use core::fmt;

use hashbrown::HashMap;

use crate::asm::Instructions;
use crate::error::SpecError;

/// Byte order of the bundle the spec was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Kernel program type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ProgramType {
    /// The reader couldn't tell the type from the program's section.
    #[default]
    Unspecified = 0,
    SocketFilter = 1,
    Kprobe = 2,
    SchedCls = 3,
    SchedAct = 4,
    Tracepoint = 5,
    Xdp = 6,
    PerfEvent = 7,
    CgroupSkb = 8,
    CgroupSock = 9,
    LwtIn = 10,
    LwtOut = 11,
    LwtXmit = 12,
    SockOps = 13,
    SkSkb = 14,
    CgroupDevice = 15,
    SkMsg = 16,
    RawTracepoint = 17,
    CgroupSockAddr = 18,
    SkLookup = 30,
    Tracing = 26,
    Netfilter = 32,
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Blueprint of a single program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    pub name: String,
    /// ELF section the program was found in, e.g. `tc` or `2/14`.
    pub section_name: String,
    pub ty: ProgramType,
    pub license: String,
    pub instructions: Instructions,
}

impl ProgramSpec {
    pub fn new(
        name: impl Into<String>,
        section_name: impl Into<String>,
        ty: ProgramType,
        instructions: Instructions,
    ) -> Self {
        Self {
            name: name.into(),
            section_name: section_name.into(),
            ty,
            license: "Dual BSD/GPL".into(),
            instructions,
        }
    }
}

/// Blueprint of a whole bundle: programs, maps and runtime variables, keyed
/// by name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionSpec {
    pub programs: HashMap<String, ProgramSpec>,
    pub maps: HashMap<String, MapSpec>,
    pub variables: HashMap<String, VariableSpec>,
    /// Byte order used to decode legacy map trailers and encode variables.
    pub byte_order: Endianness,
}

impl CollectionSpec {
    pub fn new(byte_order: Endianness) -> Self {
        Self {
            byte_order,
            ..Default::default()
        }
    }

    /// Adds a program under its own name.
    pub fn insert_program(&mut self, prog: ProgramSpec) -> Result<(), SpecError> {
        if self.programs.contains_key(&prog.name) {
            return Err(SpecError::DuplicateProgram(prog.name));
        }
        self.programs.insert(prog.name.clone(), prog);
        Ok(())
    }

    /// Adds a map under its own name.
    pub fn insert_map(&mut self, map: MapSpec) -> Result<(), SpecError> {
        if self.maps.contains_key(&map.name) {
            return Err(SpecError::DuplicateMap(map.name));
        }
        self.maps.insert(map.name.clone(), map);
        Ok(())
    }

    /// Adds a variable under its own name.
    pub fn insert_variable(&mut self, var: VariableSpec) -> Result<(), SpecError> {
        if self.variables.contains_key(&var.name) {
            return Err(SpecError::DuplicateVariable(var.name));
        }
        self.variables.insert(var.name.clone(), var);
        Ok(())
    }

    /// Program names in lexical order.
    pub fn program_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.programs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

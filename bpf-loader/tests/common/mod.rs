//! Common test utilities
//!
//! An in-memory kernel and bundle builders shared by the loader tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use bpf_api::asm::{FN_TAIL_CALL, Instruction, Register};
use bpf_api::error::{KernelError, VerifierError};
use bpf_api::kernel::{Collection, Kernel, KernelOptions, MapHandle, MapInfo, SpecReader};
use bpf_api::spec::{
    CollectionSpec, Endianness, MapSpec, MapType, PinType, ProgramSpec, ProgramType,
};
use bpf_loader::tailcall::CALLS_MAP_NAME;
use byteorder::{ByteOrder, LittleEndian};

/// A map created by [`FakeKernel`].
#[derive(Debug, PartialEq)]
pub struct FakeMap {
    pub name: String,
    pub info: MapInfo,
}

impl MapHandle for FakeMap {
    /// Fails if anything is pinned at `path` already, like a bpffs pin.
    fn pin(&self, path: &Path) -> Result<(), KernelError> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map(drop)
            .map_err(|source| KernelError::Pin {
                op: "pin",
                path: path.to_path_buf(),
                source,
            })
    }

    fn try_clone(&self) -> Result<Self, KernelError> {
        Ok(FakeMap {
            name: self.name.clone(),
            info: self.info.clone(),
        })
    }
}

/// A program created by [`FakeKernel`].
#[derive(Debug, PartialEq)]
pub struct FakeProgram {
    pub name: String,
    pub ty: ProgramType,
}

/// A program the fake verifier rejects.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub program: String,
    pub log: Vec<String>,
    /// Smallest log buffer holding the complete log.
    pub log_size: u32,
}

/// Kernel double: records every spec it's asked to load and keeps pinned
/// maps in memory.
#[derive(Debug, Default)]
pub struct FakeKernel {
    pub pinned: RefCell<HashMap<PathBuf, MapInfo>>,
    pub loads: RefCell<Vec<(CollectionSpec, KernelOptions)>>,
    pub reject: Option<Rejection>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pin(self, path: impl Into<PathBuf>, info: MapInfo) -> Self {
        self.pinned.borrow_mut().insert(path.into(), info);
        self
    }

    pub fn rejecting(mut self, rejection: Rejection) -> Self {
        self.reject = Some(rejection);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.borrow().len()
    }

    /// Spec passed to the `n`th load.
    pub fn loaded(&self, n: usize) -> CollectionSpec {
        self.loads.borrow()[n].0.clone()
    }
}

impl Kernel for FakeKernel {
    type Map = FakeMap;
    type Program = FakeProgram;

    fn load_collection(
        &self,
        spec: &CollectionSpec,
        opts: &KernelOptions,
    ) -> Result<Collection<FakeMap, FakeProgram>, KernelError> {
        self.loads.borrow_mut().push((spec.clone(), opts.clone()));

        let mut keys: Vec<&String> = spec.maps.keys().collect();
        keys.sort();

        let mut coll = Collection::new();
        let mut new_pins = Vec::new();
        for key in keys {
            let ms = &spec.maps[key];
            if ms.pinning != PinType::NONE && ms.pinning != PinType::BY_NAME {
                return Err(KernelError::Rejected {
                    op: format!("creating map {}", ms.name),
                    reason: format!("unsupported pin type {}", ms.pinning),
                });
            }

            if ms.pinning == PinType::BY_NAME {
                let dir = opts.maps.pin_path.as_ref().ok_or_else(|| KernelError::Rejected {
                    op: format!("creating map {}", ms.name),
                    reason: "no pin path".into(),
                })?;
                let path = dir.join(&ms.name);
                match self.pinned.borrow().get(&path) {
                    Some(info) => ms.compatible(info).map_err(|reason| {
                        KernelError::MapIncompatible {
                            name: ms.name.clone(),
                            reason,
                        }
                    })?,
                    None => new_pins.push((path, MapInfo::from(ms))),
                }
            }

            coll.maps.insert(
                key.clone(),
                FakeMap {
                    name: ms.name.clone(),
                    info: MapInfo::from(ms),
                },
            );
        }

        for (name, prog) in spec.programs.iter() {
            if let Some(r) = self.reject.as_ref().filter(|r| r.program == *name) {
                let truncated = opts.programs.log_disabled || opts.programs.log_size < r.log_size;
                let log = if opts.programs.log_disabled {
                    Vec::new()
                } else if truncated {
                    r.log[..1].to_vec()
                } else {
                    r.log.clone()
                };
                return Err(VerifierError::new(name.clone(), log, truncated).into());
            }

            coll.programs.insert(
                name.clone(),
                FakeProgram {
                    name: name.clone(),
                    ty: prog.ty,
                },
            );
        }

        self.pinned.borrow_mut().extend(new_pins);
        Ok(coll)
    }

    fn load_pinned_map(&self, path: &Path) -> Result<Option<MapInfo>, KernelError> {
        Ok(self.pinned.borrow().get(path).cloned())
    }
}

/// Hands out a fixed spec, standing in for the ELF parser.
pub struct FakeReader(pub CollectionSpec);

impl SpecReader for FakeReader {
    type Error = std::io::Error;

    fn read_spec(&self, path: &Path) -> Result<CollectionSpec, std::io::Error> {
        if path.extension().is_some_and(|ext| ext == "o") {
            Ok(self.0.clone())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "not an ELF object",
            ))
        }
    }
}

/// Instructions of a static tail call into `map` at `slot`.
pub fn tail_call(map: &str, slot: i32) -> Vec<Instruction> {
    vec![
        Instruction::load_map_ptr(Register::R2, map),
        Instruction::mov64_imm(Register::R3, slot),
        Instruction::call(FN_TAIL_CALL),
    ]
}

/// A program tail calling into the calls map at each of `slots`.
pub fn program(name: &str, section: &str, ty: ProgramType, slots: &[i32]) -> ProgramSpec {
    let mut insns = vec![Instruction::mov64_reg(Register::R6, Register::R1)];
    for &slot in slots {
        insns.push(Instruction::mov64_reg(Register::R1, Register::R6));
        insns.extend(tail_call(CALLS_MAP_NAME, slot));
    }
    insns.push(Instruction::mov64_imm(Register::R0, 0));
    insns.push(Instruction::exit());
    ProgramSpec::new(name, section, ty, insns)
}

/// iproute2 `bpf_elf_map` trailer.
pub fn trailer(id: u32, pinning: u32) -> Vec<u8> {
    let mut raw = vec![0u8; 16];
    LittleEndian::write_u32(&mut raw[0..4], id);
    LittleEndian::write_u32(&mut raw[4..8], pinning);
    raw
}

/// A prog array declared with an iproute2 map definition.
pub fn legacy_prog_array(name: &str, id: u32, pinning: u32) -> MapSpec {
    let mut m = MapSpec::new(name, MapType::ProgramArray, 4, 4, 64);
    m.extra = Some(trailer(id, pinning));
    m
}

/// `cil_from_container` calling slot 7, with candidates at slots 7 and 9.
pub fn lxc_bundle() -> CollectionSpec {
    let mut spec = CollectionSpec::new(Endianness::Little);
    spec.insert_map(legacy_prog_array(CALLS_MAP_NAME, 2, 0)).unwrap();
    spec.insert_program(program("cil_from_container", "tc", ProgramType::SchedCls, &[7]))
        .unwrap();
    spec.insert_program(program("tail_handle_ipv4", "2/7", ProgramType::Unspecified, &[]))
        .unwrap();
    spec.insert_program(program("tail_handle_ipv6", "2/9", ProgramType::Unspecified, &[]))
        .unwrap();
    spec
}

/// A fresh, empty directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "bpf-loader-{}-{}",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

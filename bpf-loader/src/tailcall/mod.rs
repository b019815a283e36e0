//! Tail call reachability
//!
//! Programs in sections named `2/<slot>` are tail call targets in the calls
//! map. Only those reachable from an entrypoint, directly or through other
//! tail calls, are worth loading; the rest are dropped before they reach the
//! verifier.
//!
//! Reachability is found by disassembly. A static tail call, i.e. one whose
//! slot is known at compile time, always compiles to
//!
//! ```text
//!   lddw r2, <map>
//!   mov  r3, <slot>
//!   call tail_call
//! ```
//!
//! Tail calls whose slot is computed at runtime don't match and are invisible
//! here; their targets stay only if something else keeps them reachable. An
//! equivalent sequence in a different order is not recognized either.

use std::collections::{BTreeMap, VecDeque};

use bpf_api::asm::{FN_TAIL_CALL, Instruction, Register};
use bpf_api::spec::{CollectionSpec, ProgramSpec};

use crate::compat::parse_section;
use crate::error::{LoadError, Result};

/// iproute2 map id of the calls map.
pub const CALLS_MAP_ID: u32 = 2;
/// Symbol name of the calls map.
pub const CALLS_MAP_NAME: &str = "cilium_calls";

/// A static tail call found in a program body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailCallSite<'a> {
    /// Map the call goes through.
    pub map: &'a str,
    /// Slot index loaded into r3.
    pub index: i64,
    /// Position of the `call` instruction.
    pub instruction: usize,
}

/// Checks whether `insns[i-2..=i]` is a static tail call.
pub fn static_tail_call(insns: &[Instruction], i: usize) -> Option<TailCallSite<'_>> {
    if i < 2 || i >= insns.len() {
        return None;
    }

    let call = &insns[i];
    if !call.is_builtin_call() || call.constant != FN_TAIL_CALL {
        return None;
    }

    let mov_idx = &insns[i - 1];
    if !mov_idx.opcode.is_mov()
        || !mov_idx.opcode.is_imm_source()
        || mov_idx.dst != Register::R3
    {
        return None;
    }

    let load_map = &insns[i - 2];
    if !load_map.is_load_imm64() || load_map.src != Register::PSEUDO_MAP_FD {
        return None;
    }

    Some(TailCallSite {
        map: load_map.reference.as_deref().unwrap_or(""),
        index: mov_idx.constant,
        instruction: i,
    })
}

/// Iterates over all static tail calls in a program body.
pub fn static_tail_calls(insns: &[Instruction]) -> impl Iterator<Item = TailCallSite<'_>> {
    (2..insns.len()).filter_map(move |i| static_tail_call(insns, i))
}

#[derive(Debug)]
struct TailCall {
    name: String,
    referenced: bool,
    visited: bool,
}

/// Slots of the calls map a program tail calls into. Calls through any other
/// map are skipped; a slot with no candidate program is an error.
fn visit(prog: &ProgramSpec, tailcalls: &BTreeMap<u32, TailCall>) -> Result<Vec<u32>> {
    let mut slots = Vec::new();
    for site in static_tail_calls(&prog.instructions) {
        if site.map != CALLS_MAP_NAME {
            log::debug!(
                "program found tail call, not a calls map, skipping: section={} prog={} instruction={} reference={}",
                prog.section_name,
                prog.name,
                site.instruction,
                site.map
            );
            continue;
        }

        let Some(slot) = u32::try_from(site.index)
            .ok()
            .filter(|slot| tailcalls.contains_key(slot))
        else {
            return Err(LoadError::UnknownTailCall {
                section: prog.section_name.clone(),
                program: prog.name.clone(),
                index: site.index,
                instruction: site.instruction,
            });
        };
        slots.push(slot);
    }
    Ok(slots)
}

fn mark(slots: Vec<u32>, tailcalls: &mut BTreeMap<u32, TailCall>, queue: &mut VecDeque<u32>) {
    for slot in slots {
        if let Some(tc) = tailcalls.get_mut(&slot) {
            if !tc.referenced {
                tc.referenced = true;
                queue.push_back(slot);
            }
        }
    }
}

/// Removes tail call programs no entrypoint can reach. Returns the names of
/// the removed programs.
pub fn remove_unreachable_tailcalls(spec: &mut CollectionSpec) -> Result<Vec<String>> {
    let mut entrypoints = Vec::new();
    let mut tailcalls: BTreeMap<u32, TailCall> = BTreeMap::new();

    for name in spec.program_names() {
        let prog = &spec.programs[name];
        // Anything outside the x/y convention, or in it but not targeting the
        // calls map, is an entrypoint.
        match parse_section(&prog.section_name) {
            Some((CALLS_MAP_ID, slot)) => {
                if tailcalls.contains_key(&slot) {
                    return Err(LoadError::DuplicateTailCall(slot));
                }
                tailcalls.insert(
                    slot,
                    TailCall {
                        name: name.to_string(),
                        referenced: false,
                        visited: false,
                    },
                );
            }
            _ => entrypoints.push(name),
        }
    }

    let mut queue = VecDeque::new();
    for name in entrypoints {
        let slots = visit(&spec.programs[name], &tailcalls)?;
        mark(slots, &mut tailcalls, &mut queue);
    }

    // Every entry is queued at most once, when it first becomes referenced.
    while let Some(slot) = queue.pop_front() {
        let Some(tc) = tailcalls.get(&slot) else { continue };
        if tc.visited {
            continue;
        }
        let slots = visit(&spec.programs[&tc.name], &tailcalls)?;
        if let Some(tc) = tailcalls.get_mut(&slot) {
            tc.visited = true;
        }
        mark(slots, &mut tailcalls, &mut queue);
    }

    let mut removed = Vec::new();
    for tc in tailcalls.into_values().filter(|tc| !tc.referenced) {
        if let Some(prog) = spec.programs.remove(&tc.name) {
            log::debug!(
                "unreferenced tail call, deleting: section={} prog={}",
                prog.section_name,
                prog.name
            );
        }
        removed.push(tc.name);
    }

    Ok(removed)
}

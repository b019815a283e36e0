//! Program type classification
//!
//! The kernel library infers a program's type from its ELF section. Tail
//! calls live in `<id>/<slot>` sections it doesn't recognize, so they come
//! out unspecified. A bundle only ever holds programs of one type, which is
//! taken from the first program that has one, or else from the first
//! program whose name is a known entrypoint.

use bpf_api::spec::{CollectionSpec, ProgramType};

use crate::error::{LoadError, Result};

/// Known entrypoint symbols and the type of the hook they attach to.
const ENTRYPOINTS: &[(&str, ProgramType)] = &[
    // bpf_xdp.c
    ("cil_xdp_entry", ProgramType::Xdp),
    // bpf_lxc.c
    ("cil_from_container", ProgramType::SchedCls),
    ("cil_to_container", ProgramType::SchedCls),
    // bpf_host.c
    ("cil_from_netdev", ProgramType::SchedCls),
    ("cil_from_host", ProgramType::SchedCls),
    ("cil_to_netdev", ProgramType::SchedCls),
    ("cil_to_host", ProgramType::SchedCls),
    // bpf_network.c
    ("cil_from_network", ProgramType::SchedCls),
    // bpf_overlay.c
    ("cil_to_overlay", ProgramType::SchedCls),
    ("cil_from_overlay", ProgramType::SchedCls),
    // bpf_wireguard.c
    ("cil_to_wireguard", ProgramType::SchedCls),
    ("cil_from_wireguard", ProgramType::SchedCls),
];

/// Returns the program type of a known entrypoint symbol.
pub fn entrypoint_type(name: &str) -> Option<ProgramType> {
    ENTRYPOINTS
        .iter()
        .find(|(sym, _)| *sym == name)
        .map(|&(_, ty)| ty)
}

/// Gives every unspecified program the bundle's program type.
///
/// Programs are considered in name order. Returns the type that was applied.
pub fn classify_program_types(spec: &mut CollectionSpec) -> Result<ProgramType> {
    let mut inferred = ProgramType::Unspecified;
    for name in spec.program_names() {
        let prog = &spec.programs[name];
        // A type the reader already found wins.
        if prog.ty != ProgramType::Unspecified {
            inferred = prog.ty;
            break;
        }
        if let Some(ty) = entrypoint_type(name) {
            inferred = ty;
            break;
        }
    }

    if inferred == ProgramType::Unspecified {
        return Err(LoadError::Unclassified);
    }

    for prog in spec.programs.values_mut() {
        if prog.ty == ProgramType::Unspecified {
            prog.ty = inferred;
        }
    }

    Ok(inferred)
}

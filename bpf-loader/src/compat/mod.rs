//! iproute2 compatibility
//!
//! Older bundles declare maps with the iproute2 `bpf_elf_map` layout, which
//! carries two fields the kernel library doesn't understand: a numeric map
//! id and a pinning mode. Programs refer to prog arrays by that id through
//! their section name, `<id>/<slot>`, meaning "insert me into map `<id>` at
//! `<slot>`". This module reads the trailer, applies the pinning mode and
//! turns section names into map contents.

use std::collections::BTreeMap;
use std::io::Cursor;

use bpf_api::spec::{CollectionSpec, Endianness, MapKV, PinType};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use lazy_static::lazy_static;
use regex::Regex;
use static_assertions::assert_eq_size;

use crate::error::{LoadError, Result};

lazy_static! {
    /// `<decimal id>/<slot>`; the slot's base follows its prefix and anything
    /// after it is ignored.
    static ref SECTION_RE: Regex =
        Regex::new(r"^([0-9]+)/(0[xX][0-9a-fA-F]+|0[bB][01]+|0[oO][0-7]+|0[0-7]*|[1-9][0-9]*)")
            .expect("section name pattern is valid");
}

/// Parses a `<id>/<slot>` section name. Returns `None` for anything else,
/// including ids or slots that don't fit in 32 bits.
pub fn parse_section(section: &str) -> Option<(u32, u32)> {
    let caps = SECTION_RE.captures(section)?;
    let id = caps[1].parse::<u32>().ok()?;

    let slot = &caps[2];
    let (digits, radix) = match slot.get(..2) {
        Some("0x") | Some("0X") => (&slot[2..], 16),
        Some("0b") | Some("0B") => (&slot[2..], 2),
        Some("0o") | Some("0O") => (&slot[2..], 8),
        _ if slot.len() > 1 && slot.starts_with('0') => (&slot[1..], 8),
        _ => (slot, 10),
    };
    let slot = u32::from_str_radix(digits, radix).ok()?;

    Some((id, slot))
}

/// Tail of an iproute2 `bpf_elf_map` definition, after the fields shared
/// with the kernel library's own map definition.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyMapTrailer {
    pub id: u32,
    pub pinning: u32,
    /// `inner_id` and `inner_idx`, unused.
    pub reserved: u64,
}

assert_eq_size!(LegacyMapTrailer, [u8; 16]);

impl LegacyMapTrailer {
    pub const SIZE: usize = 16;

    pub fn decode(raw: &[u8], order: Endianness) -> std::io::Result<Self> {
        match order {
            Endianness::Little => Self::decode_with::<LittleEndian>(raw),
            Endianness::Big => Self::decode_with::<BigEndian>(raw),
        }
    }

    fn decode_with<B: ByteOrder>(raw: &[u8]) -> std::io::Result<Self> {
        let mut rd = Cursor::new(raw);
        Ok(Self {
            id: rd.read_u32::<B>()?,
            pinning: rd.read_u32::<B>()?,
            reserved: rd.read_u64::<B>()?,
        })
    }
}

/// Applies legacy map trailers and assigns `<id>/<slot>` programs to their
/// prog array slots.
///
/// Each map with a trailer takes its pinning from it; maps with a non-zero
/// id become addressable by that id. Every program whose section follows
/// the convention is then appended to the contents of the map with that id,
/// so the program is inserted at its slot when the map is created.
pub fn iproute2_compat(spec: &mut CollectionSpec) -> Result<()> {
    let byte_order = spec.byte_order;

    let mut map_names: Vec<String> = spec.maps.keys().cloned().collect();
    map_names.sort_unstable();

    let mut by_id: BTreeMap<u32, String> = BTreeMap::new();
    for key in map_names {
        let Some(m) = spec.maps.get_mut(&key) else { continue };
        let Some(extra) = m.extra.as_deref().filter(|e| !e.is_empty()) else {
            continue;
        };

        let tail = LegacyMapTrailer::decode(extra, byte_order).map_err(|e| {
            LoadError::LegacyMapDefinition {
                map: m.name.clone(),
                reason: e.to_string(),
            }
        })?;

        m.pinning = PinType(tail.pinning);

        if tail.id != 0 {
            if let Some(other) = by_id.get(&tail.id) {
                return Err(LoadError::DuplicateMapId {
                    first: m.name.clone(),
                    second: spec.maps[other].name.clone(),
                    id: tail.id,
                });
            }
            by_id.insert(tail.id, key);
        }
    }

    let mut prog_names: Vec<String> = spec.programs.keys().cloned().collect();
    prog_names.sort_unstable();

    for name in prog_names {
        let Some((id, slot)) = parse_section(&spec.programs[&name].section_name) else {
            continue;
        };

        let m = by_id
            .get(&id)
            .and_then(|key| spec.maps.get_mut(key))
            .ok_or(LoadError::UnknownMapId(id))?;
        m.contents.push(MapKV::program(slot, name));
    }

    Ok(())
}

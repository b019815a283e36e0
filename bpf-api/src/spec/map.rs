use core::fmt;

use bitflags::bitflags;

use crate::kernel::MapInfo;

/// Kernel map type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum MapType {
    #[default]
    Unspecified = 0,
    Hash = 1,
    Array = 2,
    ProgramArray = 3,
    PerfEventArray = 4,
    PerCpuHash = 5,
    PerCpuArray = 6,
    LruHash = 9,
    LruPerCpuHash = 10,
    LpmTrie = 11,
    ArrayOfMaps = 12,
    HashOfMaps = 13,
    RingBuf = 27,
}

impl fmt::Display for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

bitflags! {
    /// Map creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MapFlags: u32 {
        const NO_PREALLOC = 1 << 0;
        const NO_COMMON_LRU = 1 << 1;
        const NUMA_NODE = 1 << 2;
        const RDONLY = 1 << 3;
        const WRONLY = 1 << 4;
        const RDONLY_PROG = 1 << 7;
        const WRONLY_PROG = 1 << 8;
        const MMAPABLE = 1 << 10;
    }
}

/// How a map is shared through the pin filesystem.
///
/// Kept as a raw value rather than an enum: bundles may carry pinning values
/// the kernel library doesn't define, which the loader consumes before load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PinType(pub u32);

impl PinType {
    /// Not pinned; a fresh map is created on every load.
    pub const NONE: PinType = PinType(0);
    /// Pinned under the map's name in the configured pin path, and reused
    /// from there when already present.
    pub const BY_NAME: PinType = PinType(1);
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PinType::NONE => write!(f, "none"),
            PinType::BY_NAME => write!(f, "by-name"),
            PinType(other) => write!(f, "{:#x}", other),
        }
    }
}

/// Value of a map content entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapValue {
    /// Reference to a program of the same collection, by name.
    Program(String),
    Bytes(Vec<u8>),
}

/// A key/value pair written into a map when it is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapKV {
    pub key: u32,
    pub value: MapValue,
}

impl MapKV {
    pub fn program(key: u32, name: impl Into<String>) -> Self {
        Self {
            key,
            value: MapValue::Program(name.into()),
        }
    }
}

/// Blueprint of a single map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MapSpec {
    pub name: String,
    pub ty: MapType,
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub flags: MapFlags,
    pub pinning: PinType,
    /// Trailing bytes of a legacy map definition that the reader didn't
    /// interpret.
    pub extra: Option<Vec<u8>>,
    pub contents: Vec<MapKV>,
}

impl MapSpec {
    pub fn new(
        name: impl Into<String>,
        ty: MapType,
        key_size: u32,
        value_size: u32,
        max_entries: u32,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            key_size,
            value_size,
            max_entries,
            ..Default::default()
        }
    }

    /// Checks whether an existing kernel map can stand in for this spec.
    pub fn compatible(&self, info: &MapInfo) -> Result<(), String> {
        if self.ty != info.ty {
            return Err(format!("expected type {}, got {}", self.ty, info.ty));
        }
        if self.key_size != info.key_size {
            return Err(format!("expected key size {}, got {}", self.key_size, info.key_size));
        }
        if self.value_size != info.value_size {
            return Err(format!(
                "expected value size {}, got {}",
                self.value_size, info.value_size
            ));
        }
        if self.max_entries != info.max_entries {
            return Err(format!(
                "expected max entries {}, got {}",
                self.max_entries, info.max_entries
            ));
        }
        if self.flags != info.flags {
            return Err(format!(
                "expected flags {:#x}, got {:#x}",
                self.flags.bits(),
                info.flags.bits()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatible() {
        let spec = MapSpec::new("cilium_calls", MapType::ProgramArray, 4, 4, 64);
        let mut info = MapInfo::from(&spec);
        assert!(spec.compatible(&info).is_ok());

        info.max_entries = 32;
        assert_eq!(
            spec.compatible(&info),
            Err("expected max entries 64, got 32".to_string())
        );

        let mut info = MapInfo::from(&spec);
        info.flags = MapFlags::NO_PREALLOC;
        assert!(spec.compatible(&info).is_err());
    }

    #[test]
    fn test_pin_type_display() {
        assert_eq!(PinType::NONE.to_string(), "none");
        assert_eq!(PinType::BY_NAME.to_string(), "by-name");
        assert_eq!(PinType(1 << 4).to_string(), "0x10");
    }
}

use core::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde_json::Value;

use super::Endianness;
use crate::error::VariableError;

/// Type of a runtime-configurable variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableType {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    /// Fixed-size byte array.
    Bytes(usize),
}

impl VariableType {
    pub fn size(self) -> usize {
        match self {
            VariableType::Bool | VariableType::U8 | VariableType::I8 => 1,
            VariableType::U16 | VariableType::I16 => 2,
            VariableType::U32 | VariableType::I32 => 4,
            VariableType::U64 | VariableType::I64 => 8,
            VariableType::Bytes(n) => n,
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableType::Bool => write!(f, "bool"),
            VariableType::U8 => write!(f, "u8"),
            VariableType::U16 => write!(f, "u16"),
            VariableType::U32 => write!(f, "u32"),
            VariableType::U64 => write!(f, "u64"),
            VariableType::I8 => write!(f, "i8"),
            VariableType::I16 => write!(f, "i16"),
            VariableType::I32 => write!(f, "i32"),
            VariableType::I64 => write!(f, "i64"),
            VariableType::Bytes(n) => write!(f, "[u8; {}]", n),
        }
    }
}

/// A global variable declared by the bundle, living in one of its data
/// sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSpec {
    pub name: String,
    /// Name of the data section (and therefore map) holding the variable.
    pub section: String,
    pub ty: VariableType,
    /// Current contents, `ty.size()` bytes.
    pub value: Vec<u8>,
}

impl VariableSpec {
    /// Declares a zero-initialized variable.
    pub fn new(name: impl Into<String>, section: impl Into<String>, ty: VariableType) -> Self {
        Self {
            name: name.into(),
            section: section.into(),
            ty,
            value: vec![0; ty.size()],
        }
    }

    /// Name of the map this variable lives in.
    pub fn map_name(&self) -> &str {
        &self.section
    }

    /// Replaces the variable's contents with `value`, encoded in `order`.
    pub fn set(&mut self, value: &Value, order: Endianness) -> Result<(), VariableError> {
        let bytes = match order {
            Endianness::Little => self.encode::<LittleEndian>(value)?,
            Endianness::Big => self.encode::<BigEndian>(value)?,
        };
        self.value = bytes;
        Ok(())
    }

    fn encode<B: ByteOrder>(&self, value: &Value) -> Result<Vec<u8>, VariableError> {
        let mut buf = vec![0u8; self.ty.size()];
        match self.ty {
            VariableType::Bool => {
                let b = value.as_bool().ok_or_else(|| self.mismatch(value))?;
                buf[0] = b as u8;
            }
            VariableType::U8 => buf[0] = self.unsigned(value, u8::MAX as u64)? as u8,
            VariableType::U16 => B::write_u16(&mut buf, self.unsigned(value, u16::MAX as u64)? as u16),
            VariableType::U32 => B::write_u32(&mut buf, self.unsigned(value, u32::MAX as u64)? as u32),
            VariableType::U64 => B::write_u64(&mut buf, self.unsigned(value, u64::MAX)?),
            VariableType::I8 => buf[0] = self.signed(value, i8::MIN as i64, i8::MAX as i64)? as u8,
            VariableType::I16 => B::write_i16(
                &mut buf,
                self.signed(value, i16::MIN as i64, i16::MAX as i64)? as i16,
            ),
            VariableType::I32 => B::write_i32(
                &mut buf,
                self.signed(value, i32::MIN as i64, i32::MAX as i64)? as i32,
            ),
            VariableType::I64 => B::write_i64(&mut buf, self.signed(value, i64::MIN, i64::MAX)?),
            VariableType::Bytes(n) => {
                let items = value.as_array().ok_or_else(|| self.mismatch(value))?;
                if items.len() != n {
                    return Err(self.out_of_range(value));
                }
                for (slot, item) in buf.iter_mut().zip(items) {
                    *slot = self.unsigned(item, u8::MAX as u64)? as u8;
                }
            }
        }
        Ok(buf)
    }

    fn unsigned(&self, value: &Value, max: u64) -> Result<u64, VariableError> {
        if !value.is_number() {
            return Err(self.mismatch(value));
        }
        match value.as_u64() {
            Some(v) if v <= max => Ok(v),
            _ => Err(self.out_of_range(value)),
        }
    }

    fn signed(&self, value: &Value, min: i64, max: i64) -> Result<i64, VariableError> {
        if !value.is_number() {
            return Err(self.mismatch(value));
        }
        match value.as_i64() {
            Some(v) if (min..=max).contains(&v) => Ok(v),
            _ => Err(self.out_of_range(value)),
        }
    }

    fn mismatch(&self, value: &Value) -> VariableError {
        VariableError::TypeMismatch {
            variable: self.name.clone(),
            expected: self.ty,
            value: value.to_string(),
        }
    }

    fn out_of_range(&self, value: &Value) -> VariableError {
        VariableError::OutOfRange {
            variable: self.name.clone(),
            ty: self.ty,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_unsigned() {
        let mut v = VariableSpec::new("__config_ifindex", ".rodata.config", VariableType::U32);
        v.set(&json!(0x0102_0304), Endianness::Little).unwrap();
        assert_eq!(v.value, vec![0x04, 0x03, 0x02, 0x01]);

        v.set(&json!(0x0102_0304), Endianness::Big).unwrap();
        assert_eq!(v.value, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_set_out_of_range() {
        let mut v = VariableSpec::new("x", ".rodata.config", VariableType::U8);
        assert!(matches!(
            v.set(&json!(256), Endianness::Little),
            Err(VariableError::OutOfRange { .. })
        ));
        assert!(matches!(
            v.set(&json!(-1), Endianness::Little),
            Err(VariableError::OutOfRange { .. })
        ));
        // failed writes leave the old value in place
        assert_eq!(v.value, vec![0]);
    }

    #[test]
    fn test_set_type_mismatch() {
        let mut v = VariableSpec::new("x", ".rodata.config", VariableType::Bool);
        assert!(matches!(
            v.set(&json!(1), Endianness::Little),
            Err(VariableError::TypeMismatch { .. })
        ));
        v.set(&json!(true), Endianness::Little).unwrap();
        assert_eq!(v.value, vec![1]);

        let mut v = VariableSpec::new("y", ".rodata.config", VariableType::I16);
        assert!(matches!(
            v.set(&json!("12"), Endianness::Little),
            Err(VariableError::TypeMismatch { .. })
        ));
        v.set(&json!(-2), Endianness::Little).unwrap();
        assert_eq!(v.value, vec![0xfe, 0xff]);
    }

    #[test]
    fn test_set_bytes() {
        let mut v = VariableSpec::new("mac", ".rodata.config", VariableType::Bytes(6));
        v.set(&json!([0xde, 0xad, 0xbe, 0xef, 0, 1]), Endianness::Big).unwrap();
        assert_eq!(v.value, vec![0xde, 0xad, 0xbe, 0xef, 0, 1]);

        assert!(v.set(&json!([1, 2]), Endianness::Big).is_err());
    }
}

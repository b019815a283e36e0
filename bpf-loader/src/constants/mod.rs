//! Runtime configuration constants
//!
//! Bundles declare their runtime-configurable values as global variables
//! named `__config_<field>` in the `.rodata.config` section. Callers hand in
//! values by field name, either one at a time or by flattening a
//! `serde::Serialize` struct, whose serde attributes decide field names.

use std::collections::BTreeMap;

use bpf_api::spec::CollectionSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LoadError, Result};

/// Prefix of configuration variable names.
pub const CONSTANT_PREFIX: &str = "__config_";

/// Section holding all configuration variables.
pub const CONFIG_SECTION: &str = ".rodata.config";

/// Values for configuration variables, keyed by field name (without
/// [`CONSTANT_PREFIX`]).
///
/// Values are JSON values; a variable accepts booleans for `bool`, integers
/// in range for integer types and arrays of bytes for byte arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Constants {
    fields: BTreeMap<String, Value>,
}

impl Constants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens a struct into its top-level fields.
    pub fn from_struct<T: Serialize>(obj: &T) -> Result<Self> {
        match serde_json::to_value(obj) {
            Ok(Value::Object(fields)) => Ok(Self {
                fields: fields.into_iter().collect(),
            }),
            Ok(other) => Err(LoadError::Constants(format!(
                "expected a struct, got {}",
                other
            ))),
            Err(e) => Err(LoadError::Constants(e.to_string())),
        }
    }

    /// Sets a single field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Writes `constants` into the spec's configuration variables. `None` leaves
/// the spec untouched.
pub fn apply_constants(spec: &mut CollectionSpec, constants: Option<&Constants>) -> Result<()> {
    let Some(constants) = constants else {
        return Ok(());
    };

    let byte_order = spec.byte_order;
    for (name, value) in constants.iter() {
        let const_name = format!("{}{}", CONSTANT_PREFIX, name);

        let v = spec
            .variables
            .get_mut(&const_name)
            .ok_or_else(|| LoadError::UnknownVariable(name.to_string()))?;

        if v.map_name() != CONFIG_SECTION {
            return Err(LoadError::MisplacedVariable {
                expected: CONFIG_SECTION,
                section: v.map_name().to_string(),
                name: name.to_string(),
            });
        }

        v.set(value, byte_order).map_err(|source| LoadError::SetVariable {
            name: name.to_string(),
            source,
        })?;
    }

    Ok(())
}

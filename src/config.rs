//! Values-document model
//!
//! `ConfigDocument` wraps one environment's blue/green values file as an
//! order-preserving YAML mapping. Keys are case-preserved but looked up
//! case-insensitively; every case-insensitive accessor lives here so the
//! policy is not re-derived per call site. Unrecognized keys and values
//! survive a load/mutate/serialize cycle untouched.

use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};

/// In-memory blue/green values document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    root: Mapping,
}

impl ConfigDocument {
    /// Empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from raw file bytes. Blank input yields an empty document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(bytes);
        if text.trim().is_empty() {
            return Ok(Self::new());
        }

        let value: Value = serde_yaml::from_str(&text)?;
        match value {
            Value::Mapping(root) => Ok(Self { root }),
            Value::Null => Ok(Self::new()),
            other => Err(Error::InvalidArgument(format!(
                "values document root must be a mapping, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Serialize back to YAML bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let text = serde_yaml::to_string(&Value::Mapping(self.root.clone()))?;
        Ok(text.into_bytes())
    }

    pub fn root(&self) -> &Mapping {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Mapping {
        &mut self.root
    }

    /// First root-level value whose key matches `key` case-insensitively.
    pub fn get_ci(&self, key: &str) -> Option<&Value> {
        self.root
            .iter()
            .find(|(k, _)| key_eq_ci(k, key))
            .map(|(_, v)| v)
    }

    /// First root-level section named `name` (any casing) whose value is a
    /// mapping. Used for read-only resolution; mutation goes through
    /// [`sections_mut`](Self::sections_mut) so duplicates stay in sync.
    pub fn section(&self, name: &str) -> Option<&Mapping> {
        self.root.iter().find_map(|(k, v)| {
            if key_eq_ci(k, name) {
                v.as_mapping()
            } else {
                None
            }
        })
    }

    /// Every physically-present section named `name` (any casing) whose
    /// value is a mapping. Duplicate differently-cased sections are a
    /// tolerated legacy quirk; the mutation engine writes to all of them.
    pub fn sections_mut(&mut self, name: &str) -> Vec<&mut Mapping> {
        self.root
            .iter_mut()
            .filter(|(k, _)| key_eq_ci(k, name))
            .filter_map(|(_, v)| v.as_mapping_mut())
            .collect()
    }

    /// Write `value` to every root-level key matching one of `names`
    /// case-insensitively; insert `canonical` when no key matched.
    /// Returns the number of existing keys overwritten (0 means inserted).
    pub fn set_root_ci(&mut self, names: &[&str], canonical: &str, value: Value) -> usize {
        set_ci(&mut self.root, names, canonical, value)
    }
}

/// Write `value` to every key of `map` matching one of `names`
/// case-insensitively; insert `canonical` when none matched.
pub fn set_field_ci(map: &mut Mapping, names: &[&str], canonical: &str, value: Value) {
    set_ci(map, names, canonical, value);
}

/// First value of `map` whose key matches `key` case-insensitively.
pub fn get_field_ci<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.iter().find(|(k, _)| key_eq_ci(k, key)).map(|(_, v)| v)
}

fn set_ci(map: &mut Mapping, names: &[&str], canonical: &str, value: Value) -> usize {
    let mut written = 0;
    for (k, v) in map.iter_mut() {
        if names.iter().any(|name| key_eq_ci(k, name)) {
            *v = value.clone();
            written += 1;
        }
    }
    if written == 0 {
        map.insert(Value::String(canonical.to_string()), value);
    }
    written
}

fn key_eq_ci(key: &Value, name: &str) -> bool {
    key.as_str()
        .map(|k| k.eq_ignore_ascii_case(name))
        .unwrap_or(false)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

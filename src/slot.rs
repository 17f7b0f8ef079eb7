//! Slot resolution
//!
//! Read-only derivation of blue/green activation state from a
//! [`ConfigDocument`]. Never mutates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{get_field_ci, ConfigDocument};
use crate::error::{Error, Result};

/// One of the two parallel deployment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Blue,
    Green,
}

impl Slot {
    /// The slot not receiving production traffic.
    pub fn standby(self) -> Slot {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Blue => "blue",
            Slot::Green => "green",
        }
    }

    /// Capitalized form used when inserting canonical version keys.
    pub fn capitalized(self) -> &'static str {
        match self {
            Slot::Blue => "Blue",
            Slot::Green => "Green",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blue" => Ok(Slot::Blue),
            "green" => Ok(Slot::Green),
            other => Err(Error::InvalidArgument(format!(
                "unrecognized slot {:?} (expected \"blue\" or \"green\")",
                other
            ))),
        }
    }
}

/// Raw `activeslot` value with the documented precedence: the `blue`
/// section's field, then the `green` section's, then a root-level field.
/// The value is trimmed and lowercased but not otherwise interpreted.
pub fn raw_active_slot(doc: &ConfigDocument) -> Option<String> {
    for section_name in ["blue", "green"] {
        if let Some(section) = doc.section(section_name) {
            if let Some(value) = get_field_ci(section, "activeslot") {
                return Some(normalize(value));
            }
        }
    }
    doc.get_ci("activeslot").map(normalize)
}

/// Detect the currently active slot.
///
/// Documents that carry no `activeslot` anywhere default to blue; this is
/// what lets not-yet-initialized values files flow through the same path.
/// A present but unrecognized value is rejected rather than silently
/// coerced.
pub fn detect_active_slot(doc: &ConfigDocument) -> Result<Slot> {
    match raw_active_slot(doc) {
        None => Ok(Slot::Blue),
        Some(raw) => raw.parse().map_err(|_| {
            Error::InvalidArgument(format!(
                "activeslot value {:?} is neither \"blue\" nor \"green\"",
                raw
            ))
        }),
    }
}

fn normalize(value: &serde_yaml::Value) -> String {
    match value.as_str() {
        Some(s) => s.trim().to_ascii_lowercase(),
        None => serde_yaml::to_string(value)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase(),
    }
}

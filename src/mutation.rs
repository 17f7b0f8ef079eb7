//! Mutation engine
//!
//! Pure transformations of a [`ConfigDocument`]: version bump, slot flip,
//! switch toggle. Each function works on a private copy and only returns it
//! on success, so a failed operation never exposes a half-written document.
//! All operations are idempotent: applying one twice with the same target
//! leaves the same final state as applying it once.

use std::fmt;
use std::str::FromStr;

use serde_yaml::Value;

use crate::config::{set_field_ci, ConfigDocument};
use crate::error::{Error, Result};
use crate::slot::{detect_active_slot, Slot};

/// Accepted historical spellings, canonical first on insert.
const WEIGHT_KEYS: &[&str] = &["weight"];
const STANDBY_WEIGHT_KEYS: &[&str] = &["standbyweight", "standybyweight"];

/// Desired position of a slot's traffic switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwitchState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(SwitchState::On),
            "off" => Ok(SwitchState::Off),
            other => Err(Error::InvalidArgument(format!(
                "unrecognized switch state {:?} (expected \"on\" or \"off\")",
                other
            ))),
        }
    }
}

/// Overwrite the version recorded for `slot`.
///
/// Writes to every root key spelled `appversion_<slot>` or
/// `appversion<slot>` in any casing, so stale duplicate spellings cannot
/// linger with an old value; inserts `Appversion_<slot>` when the document
/// carries none. The other slot's keys are untouched.
pub fn set_version(doc: &ConfigDocument, slot: Slot, version: &str) -> Result<ConfigDocument> {
    let version = version.trim();
    if version.is_empty() {
        return Err(Error::InvalidArgument("version must not be blank".into()));
    }

    let mut next = doc.clone();
    let underscored = format!("appversion_{}", slot);
    let joined = format!("appversion{}", slot);
    let canonical = format!("Appversion_{}", slot);
    next.set_root_ci(
        &[underscored.as_str(), joined.as_str()],
        &canonical,
        Value::String(version.to_string()),
    );
    Ok(next)
}

/// Flip which slot is active.
///
/// The target is the standby of the detected active slot. Every
/// physically-present `blue`/`green` section (any casing, duplicates
/// included) gets `activeslot` = target and the weight pair enforced:
/// active 100/0, standby 0/100. Returns the new document and the resolved
/// target color.
pub fn flip_active(doc: &ConfigDocument) -> Result<(ConfigDocument, Slot)> {
    let active = detect_active_slot(doc)?;
    let target = active.standby();

    let mut next = doc.clone();
    for color in [Slot::Blue, Slot::Green] {
        let (weight, standby_weight) = if color == target { (100, 0) } else { (0, 100) };
        for section in next.sections_mut(color.as_str()) {
            set_field_ci(
                section,
                &["activeslot"],
                "activeslot",
                Value::String(target.as_str().to_string()),
            );
            set_field_ci(section, WEIGHT_KEYS, "Weight", Value::from(weight));
            set_field_ci(
                section,
                STANDBY_WEIGHT_KEYS,
                "Standbyweight",
                Value::from(standby_weight),
            );
        }
    }
    Ok((next, target))
}

/// Force a slot's traffic switch on or off.
///
/// Writes `<color>switch` in every physically-present section of that
/// color. Only ever called with [`SwitchState::Off`] by the auto-flip
/// post-step, and only when the caller asked for it; nothing in this crate
/// forces a switch on implicitly.
pub fn set_switch(doc: &ConfigDocument, slot: Slot, state: SwitchState) -> Result<ConfigDocument> {
    let mut next = doc.clone();
    let key = format!("{}switch", slot);
    for section in next.sections_mut(slot.as_str()) {
        set_field_ci(
            section,
            &[key.as_str()],
            &key,
            Value::String(state.as_str().to_string()),
        );
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::get_field_ci;

    const SAMPLE: &str = "\
Appversion_blue: v1
Appversion_green: v2
blue:
  activeslot: blue
  weight: 100
  standbyweight: 0
  blueswitch: \"on\"
Green:
  activeslot: blue
  weight: 100
  standbyweight: 0
  greenswitch: \"off\"
";

    fn doc(yaml: &str) -> ConfigDocument {
        ConfigDocument::from_bytes(yaml.as_bytes()).unwrap()
    }

    fn field_u64(doc: &ConfigDocument, section: &str, key: &str) -> Option<u64> {
        get_field_ci(doc.section(section)?, key)?.as_u64()
    }

    fn field_str<'a>(doc: &'a ConfigDocument, section: &str, key: &str) -> Option<&'a str> {
        get_field_ci(doc.section(section)?, key)?.as_str()
    }

    #[test]
    fn flip_retargets_both_sections_and_weights() {
        let d = doc(SAMPLE);
        let (flipped, target) = flip_active(&d).unwrap();

        assert_eq!(target, Slot::Green);
        assert_eq!(field_str(&flipped, "blue", "activeslot"), Some("green"));
        assert_eq!(field_str(&flipped, "green", "activeslot"), Some("green"));
        assert_eq!(field_u64(&flipped, "blue", "weight"), Some(0));
        assert_eq!(field_u64(&flipped, "blue", "standbyweight"), Some(100));
        assert_eq!(field_u64(&flipped, "green", "weight"), Some(100));
        assert_eq!(field_u64(&flipped, "green", "standbyweight"), Some(0));

        // version fields are not part of a flip
        assert_eq!(flipped.get_ci("appversion_blue").unwrap().as_str(), Some("v1"));
        assert_eq!(flipped.get_ci("appversion_green").unwrap().as_str(), Some("v2"));
    }

    #[test]
    fn double_flip_restores_activation_state() {
        let d = doc(SAMPLE);
        let (once, first) = flip_active(&d).unwrap();
        let (twice, second) = flip_active(&once).unwrap();

        assert_eq!(first, Slot::Green);
        assert_eq!(second, Slot::Blue);
        assert_eq!(field_str(&twice, "blue", "activeslot"), Some("blue"));
        assert_eq!(field_str(&twice, "green", "activeslot"), Some("blue"));
        assert_eq!(field_u64(&twice, "blue", "weight"), Some(100));
        assert_eq!(field_u64(&twice, "green", "weight"), Some(0));
        assert_eq!(field_u64(&twice, "blue", "standbyweight"), Some(0));
        assert_eq!(field_u64(&twice, "green", "standbyweight"), Some(100));
    }

    #[test]
    fn flip_syncs_duplicate_cased_sections() {
        let d = doc("blue:\n  activeslot: blue\nBlue:\n  activeslot: blue\ngreen:\n  activeslot: blue\n");
        let (flipped, target) = flip_active(&d).unwrap();
        assert_eq!(target, Slot::Green);

        let synced: Vec<&str> = flipped
            .root()
            .iter()
            .filter_map(|(_, v)| v.as_mapping())
            .filter_map(|m| get_field_ci(m, "activeslot"))
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(synced, vec!["green", "green", "green"]);
    }

    #[test]
    fn flip_writes_existing_misspelled_standbyweight() {
        let d = doc("blue:\n  activeslot: green\n  Standybyweight: 0\ngreen:\n  activeslot: green\n");
        let (flipped, target) = flip_active(&d).unwrap();
        assert_eq!(target, Slot::Blue);

        let blue = flipped.section("blue").unwrap();
        // the transposed spelling is updated in place, not duplicated
        assert_eq!(
            get_field_ci(blue, "standybyweight").and_then(Value::as_u64),
            Some(0)
        );
        assert!(get_field_ci(blue, "standbyweight").is_none());
    }

    #[test]
    fn flip_leaves_input_document_untouched() {
        let d = doc(SAMPLE);
        let before = d.clone();
        let _ = flip_active(&d).unwrap();
        assert_eq!(d, before);
    }

    #[test]
    fn set_version_targets_only_requested_slot() {
        let d = doc(SAMPLE);
        let next = set_version(&d, Slot::Green, "v3").unwrap();
        assert_eq!(next.get_ci("appversion_green").unwrap().as_str(), Some("v3"));
        assert_eq!(next.get_ci("appversion_blue").unwrap().as_str(), Some("v1"));
    }

    #[test]
    fn set_version_rewrites_every_duplicate_key() {
        let d = doc("Appversion_blue: v1\nappversionblue: v0\nAppversion_green: v2\n");
        let next = set_version(&d, Slot::Blue, "v9").unwrap();

        assert_eq!(next.get_ci("appversion_blue").unwrap().as_str(), Some("v9"));
        assert_eq!(next.get_ci("appversionblue").unwrap().as_str(), Some("v9"));
        assert_eq!(next.get_ci("appversion_green").unwrap().as_str(), Some("v2"));
    }

    #[test]
    fn set_version_inserts_canonical_key() {
        let d = doc("blue:\n  activeslot: blue\n");
        let next = set_version(&d, Slot::Green, "v1").unwrap();
        let key_present = next
            .root()
            .iter()
            .any(|(k, _)| k.as_str() == Some("Appversion_green"));
        assert!(key_present);
    }

    #[test]
    fn set_version_rejects_blank() {
        let d = doc(SAMPLE);
        assert!(matches!(
            set_version(&d, Slot::Blue, "   "),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn set_version_is_idempotent() {
        let d = doc(SAMPLE);
        let once = set_version(&d, Slot::Blue, "v5").unwrap();
        let twice = set_version(&once, Slot::Blue, "v5").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn set_switch_is_idempotent() {
        let d = doc(SAMPLE);
        let once = set_switch(&d, Slot::Green, SwitchState::Off).unwrap();
        let twice = set_switch(&once, Slot::Green, SwitchState::Off).unwrap();
        assert_eq!(once, twice);
        assert_eq!(field_str(&once, "green", "greenswitch"), Some("off"));
    }

    #[test]
    fn set_switch_respects_existing_key_casing() {
        let d = doc("Green:\n  GreenSwitch: \"on\"\n");
        let next = set_switch(&d, Slot::Green, SwitchState::Off).unwrap();
        let green = next.section("green").unwrap();
        assert_eq!(green.len(), 1);
        assert_eq!(
            get_field_ci(green, "greenswitch").and_then(Value::as_str),
            Some("off")
        );
    }

    #[test]
    fn switch_state_parses() {
        assert_eq!("ON".parse::<SwitchState>().unwrap(), SwitchState::On);
        assert_eq!(" off ".parse::<SwitchState>().unwrap(), SwitchState::Off);
        assert!("toggle".parse::<SwitchState>().is_err());
    }
}

//! Hotkey profiles: a toggle key bound to a set of input devices

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::hotkey::{HotkeyError, KeySpec};

const DEFAULT_MIC: &str = "default-mic";
const ALL_MICS: &str = "all-mics";

/// Which devices a profile acts on, resolved at toggle time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceSelector {
    /// One specific device id
    Device(String),
    /// Whatever the OS default input is when the action runs
    DefaultMic,
    /// Every enumerated input device
    AllMics,
}

impl From<String> for DeviceSelector {
    fn from(value: String) -> Self {
        match value.as_str() {
            DEFAULT_MIC => Self::DefaultMic,
            ALL_MICS => Self::AllMics,
            _ => Self::Device(value),
        }
    }
}

impl From<DeviceSelector> for String {
    fn from(selector: DeviceSelector) -> Self {
        match selector {
            DeviceSelector::Device(id) => id,
            DeviceSelector::DefaultMic => DEFAULT_MIC.to_string(),
            DeviceSelector::AllMics => ALL_MICS.to_string(),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Device(id) => write!(f, "{id}"),
            DeviceSelector::DefaultMic => write!(f, "{DEFAULT_MIC}"),
            DeviceSelector::AllMics => write!(f, "{ALL_MICS}"),
        }
    }
}

/// Named binding of a toggle key to a device selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotkeyProfile {
    pub id: String,
    pub name: String,
    /// Modifier tokens followed by one key, e.g. `["Ctrl", "F9"]`
    #[serde(deserialize_with = "toggle_key_tokens")]
    pub toggle_key: Vec<String>,
    pub device_selector: DeviceSelector,
    #[serde(default)]
    pub ignore_modifiers: bool,
}

/// Reasons a profile is rejected before activation or save
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("profile id cannot be empty")]
    EmptyId,

    #[error("profile name cannot be empty")]
    EmptyName,

    #[error("device id cannot be empty")]
    EmptyDevice,

    #[error(transparent)]
    Hotkey(#[from] HotkeyError),
}

impl HotkeyProfile {
    /// Validate the profile and return the parsed toggle key
    pub fn validate(&self) -> Result<KeySpec, ProfileError> {
        if self.id.trim().is_empty() {
            return Err(ProfileError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(ProfileError::EmptyName);
        }
        if matches!(&self.device_selector, DeviceSelector::Device(id) if id.trim().is_empty()) {
            return Err(ProfileError::EmptyDevice);
        }
        Ok(self.key_spec()?)
    }

    pub fn key_spec(&self) -> Result<KeySpec, HotkeyError> {
        KeySpec::from_tokens(self.toggle_key.as_slice())
    }
}

/// Accept either a token list or an accelerator string like `"Ctrl+F9"`
fn toggle_key_tokens<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ToggleKey {
        Tokens(Vec<String>),
        Accelerator(String),
    }

    Ok(match ToggleKey::deserialize(deserializer)? {
        ToggleKey::Tokens(tokens) => tokens,
        ToggleKey::Accelerator(accelerator) if accelerator.is_empty() => Vec::new(),
        ToggleKey::Accelerator(accelerator) => accelerator
            .split('+')
            .map(|token| token.trim().to_string())
            .collect(),
    })
}

#[cfg(test)]
pub(crate) fn test_profile(id: &str, key: &str, selector: DeviceSelector) -> HotkeyProfile {
    HotkeyProfile {
        id: id.to_string(),
        name: format!("Profile {id}"),
        toggle_key: key.split('+').map(str::to_string).collect(),
        device_selector: selector,
        ignore_modifiers: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_serialization() {
        let json = serde_json::to_string(&DeviceSelector::AllMics).unwrap();
        assert_eq!(json, r#""all-mics""#);

        let selector: DeviceSelector = serde_json::from_str(r#""default-mic""#).unwrap();
        assert_eq!(selector, DeviceSelector::DefaultMic);

        let selector: DeviceSelector = serde_json::from_str(r#""{0.0.1}.{abc}""#).unwrap();
        assert_eq!(selector, DeviceSelector::Device("{0.0.1}.{abc}".to_string()));
    }

    #[test]
    fn test_profile_deserialization_accepts_accelerator() {
        let json = r#"{
            "id": "work",
            "name": "Work",
            "toggleKey": "Ctrl+Shift+M",
            "deviceSelector": "all-mics"
        }"#;
        let profile: HotkeyProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.toggle_key, vec!["Ctrl", "Shift", "M"]);
        assert!(!profile.ignore_modifiers);
        assert_eq!(profile.device_selector, DeviceSelector::AllMics);
    }

    #[test]
    fn test_profile_round_trips_token_list() {
        let profile = test_profile("p", "Alt+F9", DeviceSelector::DefaultMic);
        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains(r#""toggleKey":["Alt","F9"]"#));
        let back: HotkeyProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn test_validate() {
        let good = test_profile("p", "F9", DeviceSelector::DefaultMic);
        assert_eq!(good.validate().unwrap().key(), "F9");

        let mut no_name = good.clone();
        no_name.name = " ".to_string();
        assert_eq!(no_name.validate(), Err(ProfileError::EmptyName));

        let mut no_key = good.clone();
        no_key.toggle_key.clear();
        assert!(matches!(no_key.validate(), Err(ProfileError::Hotkey(_))));

        let mut modifier_last = good.clone();
        modifier_last.toggle_key = vec!["F9".to_string(), "Shift".to_string()];
        assert!(modifier_last.validate().is_err());

        let mut blank_device = good;
        blank_device.device_selector = DeviceSelector::Device(String::new());
        assert_eq!(blank_device.validate(), Err(ProfileError::EmptyDevice));
    }
}

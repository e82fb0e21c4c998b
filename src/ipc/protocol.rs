//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::audio::AudioDevice;
use crate::config::AppSettings;
use crate::events::StateEvent;
use crate::profile::HotkeyProfile;

/// Largest frame accepted in either direction
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    GetMuteState,

    /// Flip the active profile's device set
    ToggleMute,

    /// Force a specific mute state
    SetMute {
        muted: bool,
        /// Skip audible feedback
        #[serde(default)]
        silent: bool,
    },

    /// Activate a profile given by value
    SetActiveProfile { profile: HotkeyProfile },

    /// Activate a stored profile by id
    ActivateProfile { id: String },

    DeactivateProfile,

    GetActiveProfile,

    GetAudioDevices,

    ListProfiles,

    SaveProfile { profile: HotkeyProfile },

    DeleteProfile { id: String },

    GetSettings,

    UpdateSettings { settings: AppSettings },

    /// Subscribe to state change notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    MuteState { muted: bool },

    /// Request completed with nothing to report
    Ok,

    ActiveProfile { profile: Option<HotkeyProfile> },

    AudioDevices { devices: Vec<AudioDevice> },

    Profiles { profiles: Vec<HotkeyProfile> },

    Settings { settings: AppSettings },

    /// Subscription confirmed
    Subscribed,

    /// Pushed to subscribed clients
    Notification { event: StateEvent },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl ToString) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    pub muted: bool,

    pub active_profile_id: Option<String>,

    /// OS-level bindings held for the active profile
    pub registered_hotkeys: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeSource;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetMute {
            muted: true,
            silent: false,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""type":"set_mute""#));
        assert!(json.contains(r#""muted":true"#));
    }

    #[test]
    fn test_set_mute_silent_defaults_off() {
        let req: Request = serde_json::from_str(r#"{"type":"set_mute","muted":true}"#).unwrap();
        assert!(matches!(
            req,
            Request::SetMute {
                muted: true,
                silent: false
            }
        ));
    }

    #[test]
    fn test_profile_request_uses_camel_case_profile() {
        let json = r#"{
            "type": "set_active_profile",
            "profile": {
                "id": "work",
                "name": "Work",
                "toggleKey": ["Ctrl", "F9"],
                "deviceSelector": "default-mic",
                "ignoreModifiers": true
            }
        }"#;
        let Request::SetActiveProfile { profile } = serde_json::from_str(json).unwrap() else {
            panic!("wrong request variant");
        };
        assert!(profile.ignore_modifiers);
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus {
            version: "0.1.0".to_string(),
            uptime_secs: 3,
            muted: true,
            active_profile_id: None,
            registered_hotkeys: 0,
        });
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""muted":true"#));
    }

    #[test]
    fn test_notification_nests_event() {
        let resp = Response::Notification {
            event: StateEvent::MuteChanged {
                muted: false,
                source: ChangeSource::Poll,
                silent: true,
            },
        };
        let value: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["event"]["type"], "mute_changed");
        assert_eq!(value["event"]["source"], "poll");
    }
}

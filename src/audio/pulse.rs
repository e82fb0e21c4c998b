//! PulseAudio / PipeWire backend driven through the `pactl` CLI
//!
//! Device ids are source names. Monitor sources (loopbacks of output
//! sinks) are not microphones and are filtered out. Mute state comes from
//! the JSON source list, whose keys are not translated.

use std::process::{Command, Output};

use serde::Deserialize;
use tracing::debug;

use super::{AudioBackend, AudioDevice, AudioError};

const PACTL: &str = "pactl";

#[derive(Debug, Deserialize)]
struct PactlSource {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    monitor_of_sink: Option<String>,
    #[serde(default)]
    mute: bool,
}

impl PactlSource {
    fn is_monitor(&self) -> bool {
        let monitors_sink = self
            .monitor_of_sink
            .as_deref()
            .is_some_and(|sink| sink != "n/a" && !sink.is_empty());
        monitors_sink || self.name.ends_with(".monitor")
    }
}

/// Audio backend that shells out to `pactl`
pub struct PulseBackend {
    program: String,
}

impl PulseBackend {
    pub fn new() -> Self {
        Self {
            program: PACTL.to_string(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output, AudioError> {
        debug!(?args, "pactl");
        Command::new(&self.program)
            .args(args)
            .env("LC_ALL", "C")
            .output()
            .map_err(|e| AudioError::Backend(format!("failed to run {}: {e}", self.program)))
    }

    fn run_for_device(&self, device_id: &str, args: &[&str]) -> Result<String, AudioError> {
        let output = self.run(args)?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(device_id, &stderr))
    }

    fn default_source_name(&self) -> Result<Option<String>, AudioError> {
        let output = self.run(&["get-default-source"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!name.is_empty()).then_some(name))
    }

    fn source_list(&self) -> Result<Vec<u8>, AudioError> {
        let output = self.run(&["--format=json", "list", "sources"])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AudioError::Backend(stderr.trim().to_string()));
        }
        Ok(output.stdout)
    }
}

impl AudioBackend for PulseBackend {
    fn list_devices(&self) -> Result<Vec<AudioDevice>, AudioError> {
        let json = self.source_list()?;
        let default = self.default_source_name()?;
        parse_sources(&json, default.as_deref())
    }

    fn default_device(&self) -> Result<Option<AudioDevice>, AudioError> {
        let Some(default) = self.default_source_name()? else {
            return Ok(None);
        };
        let described = self
            .list_devices()?
            .into_iter()
            .find(|device| device.id == default);
        Ok(Some(described.unwrap_or(AudioDevice {
            name: default.clone(),
            id: default,
            is_default: true,
        })))
    }

    fn get_mute(&self, device_id: &str) -> Result<bool, AudioError> {
        source_mute(&self.source_list()?, device_id)
    }

    fn set_mute(&self, device_id: &str, muted: bool) -> Result<(), AudioError> {
        let flag = if muted { "1" } else { "0" };
        self.run_for_device(device_id, &["set-source-mute", device_id, flag])?;
        Ok(())
    }
}

fn decode_sources(json: &[u8]) -> Result<Vec<PactlSource>, AudioError> {
    serde_json::from_slice(json)
        .map_err(|e| AudioError::Backend(format!("unreadable pactl source list: {e}")))
}

fn parse_sources(json: &[u8], default: Option<&str>) -> Result<Vec<AudioDevice>, AudioError> {
    Ok(decode_sources(json)?
        .into_iter()
        .filter(|source| !source.is_monitor())
        .map(|source| AudioDevice {
            is_default: default == Some(source.name.as_str()),
            name: source.description.unwrap_or_else(|| source.name.clone()),
            id: source.name,
        })
        .collect())
}

/// Mute flag of one non-monitor source
fn source_mute(json: &[u8], device_id: &str) -> Result<bool, AudioError> {
    decode_sources(json)?
        .into_iter()
        .find(|source| source.name == device_id && !source.is_monitor())
        .map(|source| source.mute)
        .ok_or_else(|| AudioError::DeviceUnavailable {
            device_id: device_id.to_string(),
        })
}

fn classify_failure(device_id: &str, stderr: &str) -> AudioError {
    if stderr.contains("No such entity") {
        AudioError::DeviceUnavailable {
            device_id: device_id.to_string(),
        }
    } else {
        AudioError::Backend(stderr.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCES: &str = r#"[
        {"index": 0, "name": "alsa_output.pci.analog-stereo.monitor",
         "description": "Monitor of Built-in Audio", "monitor_of_sink": "alsa_output.pci.analog-stereo", "mute": false},
        {"index": 1, "name": "alsa_input.pci.analog-stereo",
         "description": "Built-in Audio Analog Stereo", "monitor_of_sink": "n/a", "mute": false},
        {"index": 2, "name": "alsa_input.usb-headset.mono",
         "description": "USB Headset", "monitor_of_sink": null, "mute": true}
    ]"#;

    #[test]
    fn test_parse_sources_skips_monitors() {
        let devices = parse_sources(SOURCES.as_bytes(), Some("alsa_input.usb-headset.mono")).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Built-in Audio Analog Stereo");
        assert!(!devices[0].is_default);
        assert!(devices[1].is_default);
    }

    #[test]
    fn test_parse_sources_rejects_garbage() {
        assert!(matches!(
            parse_sources(b"Source #0", None),
            Err(AudioError::Backend(_))
        ));
    }

    #[test]
    fn test_source_mute_from_list() {
        let json = SOURCES.as_bytes();
        assert!(source_mute(json, "alsa_input.usb-headset.mono").unwrap());
        assert!(!source_mute(json, "alsa_input.pci.analog-stereo").unwrap());
    }

    #[test]
    fn test_source_mute_missing_or_monitor_is_unavailable() {
        let json = SOURCES.as_bytes();
        assert!(matches!(
            source_mute(json, "alsa_input.gone"),
            Err(AudioError::DeviceUnavailable { .. })
        ));
        assert!(matches!(
            source_mute(json, "alsa_output.pci.analog-stereo.monitor"),
            Err(AudioError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn test_source_mute_ignores_localized_fields() {
        // descriptions and properties are translated, the keys are not
        let json = br#"[{"name": "alsa_input.usb", "description": "USB-Mikrofon",
            "monitor_of_sink": "n/a", "mute": true,
            "properties": {"device.description": "USB-Mikrofon"}}]"#;
        assert!(source_mute(json, "alsa_input.usb").unwrap());
    }

    #[test]
    fn test_missing_source_is_unavailable() {
        assert_eq!(
            classify_failure("mic", "Failure: No such entity\n"),
            AudioError::DeviceUnavailable {
                device_id: "mic".to_string()
            }
        );
        assert!(matches!(
            classify_failure("mic", "Connection failure: Connection refused"),
            AudioError::Backend(_)
        ));
    }
}

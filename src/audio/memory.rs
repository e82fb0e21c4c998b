//! In-process audio backend with simulated input devices
//!
//! Used for dry runs (`TOGMIC_AUDIO_BACKEND=memory`) and as the test double
//! for everything above the backend trait. The extra methods play the part
//! of the OS: plugging devices, switching the default, muting externally.

use std::sync::{Mutex, MutexGuard};

use super::{AudioBackend, AudioDevice, AudioError};

struct SimulatedDevice {
    id: String,
    name: String,
    muted: bool,
}

#[derive(Default)]
struct Devices {
    devices: Vec<SimulatedDevice>,
    default_id: Option<String>,
}

/// Audio backend backed by an in-memory device list
#[derive(Default)]
pub struct MemoryBackend {
    devices: Mutex<Devices>,
}

#[cfg_attr(not(test), allow(dead_code))]
impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two unmuted microphones, the first one being the default
    pub fn with_default_devices() -> Self {
        let backend = Self::new();
        backend.add_device("memory-mic-1", "Simulated Microphone", true);
        backend.add_device("memory-mic-2", "Simulated Headset", false);
        backend
    }

    fn lock(&self) -> MutexGuard<'_, Devices> {
        self.devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plug in an unmuted device
    pub fn add_device(&self, id: &str, name: &str, is_default: bool) {
        let mut devices = self.lock();
        devices.devices.retain(|device| device.id != id);
        devices.devices.push(SimulatedDevice {
            id: id.to_string(),
            name: name.to_string(),
            muted: false,
        });
        if is_default {
            devices.default_id = Some(id.to_string());
        }
    }

    /// Remove a device as if it was unplugged
    pub fn unplug(&self, id: &str) {
        let mut devices = self.lock();
        devices.devices.retain(|device| device.id != id);
        if devices.default_id.as_deref() == Some(id) {
            devices.default_id = None;
        }
    }

    /// Change the OS default input device
    pub fn set_default(&self, id: &str) {
        self.lock().default_id = Some(id.to_string());
    }

    /// Change a device's mute state behind the daemon's back
    pub fn set_external_mute(&self, id: &str, muted: bool) {
        if let Some(device) = self.lock().devices.iter_mut().find(|d| d.id == id) {
            device.muted = muted;
        }
    }

    /// Mute state of a device, `None` if it is not plugged in
    pub fn muted(&self, id: &str) -> Option<bool> {
        self.lock()
            .devices
            .iter()
            .find(|device| device.id == id)
            .map(|device| device.muted)
    }
}

fn unavailable(id: &str) -> AudioError {
    AudioError::DeviceUnavailable {
        device_id: id.to_string(),
    }
}

impl AudioBackend for MemoryBackend {
    fn list_devices(&self) -> Result<Vec<AudioDevice>, AudioError> {
        let devices = self.lock();
        Ok(devices
            .devices
            .iter()
            .map(|device| AudioDevice {
                id: device.id.clone(),
                name: device.name.clone(),
                is_default: devices.default_id.as_deref() == Some(device.id.as_str()),
            })
            .collect())
    }

    fn default_device(&self) -> Result<Option<AudioDevice>, AudioError> {
        Ok(self
            .list_devices()?
            .into_iter()
            .find(|device| device.is_default))
    }

    fn get_mute(&self, device_id: &str) -> Result<bool, AudioError> {
        self.muted(device_id).ok_or_else(|| unavailable(device_id))
    }

    fn set_mute(&self, device_id: &str, muted: bool) -> Result<(), AudioError> {
        let mut devices = self.lock();
        let device = devices
            .devices
            .iter_mut()
            .find(|device| device.id == device_id)
            .ok_or_else(|| unavailable(device_id))?;
        device.muted = muted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_devices() {
        let backend = MemoryBackend::with_default_devices();
        let devices = backend.list_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(
            backend.default_device().unwrap().map(|d| d.id),
            Some("memory-mic-1".to_string())
        );
    }

    #[test]
    fn test_unplugged_device_is_unavailable() {
        let backend = MemoryBackend::with_default_devices();
        backend.unplug("memory-mic-1");
        assert!(matches!(
            backend.set_mute("memory-mic-1", true),
            Err(AudioError::DeviceUnavailable { .. })
        ));
        assert_eq!(backend.default_device().unwrap(), None);
    }

    #[test]
    fn test_set_and_get_mute() {
        let backend = MemoryBackend::with_default_devices();
        backend.set_mute("memory-mic-2", true).unwrap();
        assert!(backend.get_mute("memory-mic-2").unwrap());
        assert!(!backend.get_mute("memory-mic-1").unwrap());
    }
}

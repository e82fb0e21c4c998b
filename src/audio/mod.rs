//! Audio module: input-device enumeration and mute control
//!
//! The platform APIs sit behind [`AudioBackend`]. Everything above it works
//! on device *sets* resolved from a [`DeviceSelector`] at call time, with
//! per-device failures skipped rather than aborting the whole operation.

mod memory;
#[cfg(target_os = "linux")]
mod pulse;
#[cfg(windows)]
mod wasapi;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::profile::DeviceSelector;

pub use memory::MemoryBackend;

/// Snapshot of one audio input device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDevice {
    /// Opaque platform device id
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// Audio backend error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    #[error("device unavailable: {device_id}")]
    DeviceUnavailable { device_id: String },

    #[error("no default input device")]
    NoDefaultDevice,

    #[error("no input devices to act on")]
    NoDevices,

    #[error("every device failed ({attempted} attempted)")]
    AllDevicesFailed { attempted: usize },

    #[error("audio control is not supported on this platform")]
    Unsupported,

    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Platform capability for input-device mute control.
///
/// Calls may block on real device I/O.
pub trait AudioBackend: Send + Sync {
    fn list_devices(&self) -> Result<Vec<AudioDevice>, AudioError>;

    /// Current OS default input device, if any
    fn default_device(&self) -> Result<Option<AudioDevice>, AudioError>;

    fn get_mute(&self, device_id: &str) -> Result<bool, AudioError>;

    fn set_mute(&self, device_id: &str, muted: bool) -> Result<(), AudioError>;
}

/// Which concrete backend to run with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The platform's native audio API
    System,
    /// In-process simulated devices
    Memory,
}

/// Create the backend for `kind`, selecting the platform implementation.
pub fn create_backend(kind: BackendKind) -> Arc<dyn AudioBackend> {
    match kind {
        BackendKind::Memory => {
            info!("using in-memory audio backend");
            Arc::new(MemoryBackend::with_default_devices())
        }
        BackendKind::System => system_backend(),
    }
}

#[cfg(windows)]
fn system_backend() -> Arc<dyn AudioBackend> {
    info!("using Windows Core Audio backend");
    Arc::new(wasapi::WasapiBackend)
}

#[cfg(target_os = "linux")]
fn system_backend() -> Arc<dyn AudioBackend> {
    info!("using PulseAudio backend");
    Arc::new(pulse::PulseBackend::new())
}

#[cfg(not(any(windows, target_os = "linux")))]
fn system_backend() -> Arc<dyn AudioBackend> {
    warn!("no native audio backend for this platform");
    Arc::new(UnsupportedBackend)
}

/// Backend for platforms without native mute control
#[cfg_attr(any(windows, target_os = "linux"), allow(dead_code))]
pub struct UnsupportedBackend;

impl AudioBackend for UnsupportedBackend {
    fn list_devices(&self) -> Result<Vec<AudioDevice>, AudioError> {
        Err(AudioError::Unsupported)
    }

    fn default_device(&self) -> Result<Option<AudioDevice>, AudioError> {
        Err(AudioError::Unsupported)
    }

    fn get_mute(&self, _device_id: &str) -> Result<bool, AudioError> {
        Err(AudioError::Unsupported)
    }

    fn set_mute(&self, _device_id: &str, _muted: bool) -> Result<(), AudioError> {
        Err(AudioError::Unsupported)
    }
}

/// Resolve a selector to concrete device ids, querying the backend now.
pub fn resolve(backend: &dyn AudioBackend, selector: &DeviceSelector) -> Result<Vec<String>, AudioError> {
    let ids = match selector {
        DeviceSelector::Device(id) => vec![id.clone()],
        DeviceSelector::DefaultMic => {
            let device = backend.default_device()?.ok_or(AudioError::NoDefaultDevice)?;
            vec![device.id]
        }
        DeviceSelector::AllMics => backend
            .list_devices()?
            .into_iter()
            .map(|device| device.id)
            .collect(),
    };

    if ids.is_empty() {
        return Err(AudioError::NoDevices);
    }
    debug!(%selector, devices = ids.len(), "resolved device set");
    Ok(ids)
}

/// Aggregate mute state of a device set.
///
/// Muted only if every readable device reports muted; a mixed set counts as
/// unmuted so the next toggle always has a defined direction.
pub fn read_aggregate(backend: &dyn AudioBackend, device_ids: &[String]) -> Result<bool, AudioError> {
    let mut readable = 0usize;
    let mut all_muted = true;

    for device_id in device_ids {
        match backend.get_mute(device_id) {
            Ok(muted) => {
                readable += 1;
                all_muted &= muted;
            }
            Err(e) => warn!(%device_id, error = %e, "skipping device while reading mute state"),
        }
    }

    if readable == 0 {
        return Err(AudioError::AllDevicesFailed {
            attempted: device_ids.len(),
        });
    }
    Ok(all_muted)
}

/// Result of a multi-device mute write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteOutcome {
    pub applied: usize,
    pub skipped: usize,
}

/// Set `muted` on every device, continuing past individual failures.
pub fn apply_mute(
    backend: &dyn AudioBackend,
    device_ids: &[String],
    muted: bool,
) -> Result<MuteOutcome, AudioError> {
    let mut outcome = MuteOutcome {
        applied: 0,
        skipped: 0,
    };

    for device_id in device_ids {
        match backend.set_mute(device_id, muted) {
            Ok(()) => outcome.applied += 1,
            Err(e) => {
                warn!(%device_id, muted, error = %e, "skipping device");
                outcome.skipped += 1;
            }
        }
    }

    if outcome.applied == 0 {
        return Err(AudioError::AllDevicesFailed {
            attempted: device_ids.len(),
        });
    }
    Ok(outcome)
}

/// Resolve `selector` and read its aggregate state in one step
pub fn selector_state(backend: &dyn AudioBackend, selector: &DeviceSelector) -> Result<bool, AudioError> {
    let ids = resolve(backend, selector)?;
    read_aggregate(backend, &ids)
}

/// Resolve `selector` and write `muted` to the whole set
pub fn set_selector_mute(
    backend: &dyn AudioBackend,
    selector: &DeviceSelector,
    muted: bool,
) -> Result<MuteOutcome, AudioError> {
    let ids = resolve(backend, selector)?;
    apply_mute(backend, &ids, muted)
}

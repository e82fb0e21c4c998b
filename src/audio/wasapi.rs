//! Windows Core Audio backend (MMDevice + IAudioEndpointVolume)
//!
//! Every call initialises COM for the calling thread, since calls arrive on
//! whichever blocking-pool thread the runtime hands out.

use windows::core::PCWSTR;
use windows::Win32::Devices::Properties::DEVPKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::Endpoints::IAudioEndpointVolume;
use windows::Win32::Media::Audio::{
    eCapture, eConsole, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED, STGM,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

use super::{AudioBackend, AudioDevice, AudioError};

/// COM initialization guard that uninitializes COM on drop.
struct ComGuard;

impl ComGuard {
    fn new() -> Result<Self, AudioError> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED)
                .ok()
                .map_err(|e| AudioError::Backend(format!("COM initialization failed: {e}")))?;
        }
        Ok(Self)
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

fn windows_error(context: &str, error: windows::core::Error) -> AudioError {
    AudioError::Backend(format!("{context}: {error}"))
}

/// Capture endpoints through the Windows MMDevice API
pub struct WasapiBackend;

impl WasapiBackend {
    fn enumerator() -> Result<IMMDeviceEnumerator, AudioError> {
        unsafe {
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| windows_error("failed to create device enumerator", e))
        }
    }

    fn device(enumerator: &IMMDeviceEnumerator, device_id: &str) -> Result<IMMDevice, AudioError> {
        let unavailable = || AudioError::DeviceUnavailable {
            device_id: device_id.to_string(),
        };
        let wide: Vec<u16> = device_id.encode_utf16().chain(std::iter::once(0)).collect();

        unsafe {
            let device = enumerator
                .GetDevice(PCWSTR::from_raw(wide.as_ptr()))
                .map_err(|_| unavailable())?;
            let state = device.GetState().map_err(|_| unavailable())?;
            if state != DEVICE_STATE_ACTIVE {
                return Err(unavailable());
            }
            Ok(device)
        }
    }

    fn endpoint_volume(device: &IMMDevice) -> Result<IAudioEndpointVolume, AudioError> {
        unsafe {
            device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| windows_error("volume control not available", e))
        }
    }

    fn device_id(device: &IMMDevice) -> Result<String, AudioError> {
        unsafe {
            let raw = device
                .GetId()
                .map_err(|e| windows_error("failed to read device id", e))?;
            let id = raw.to_string();
            CoTaskMemFree(Some(raw.0 as *const _));
            id.map_err(|e| AudioError::Backend(format!("device id is not UTF-16: {e}")))
        }
    }

    fn friendly_name(device: &IMMDevice) -> Option<String> {
        unsafe {
            let props: IPropertyStore = device.OpenPropertyStore(STGM(0)).ok()?;
            let key = PROPERTYKEY {
                fmtid: DEVPKEY_Device_FriendlyName.fmtid,
                pid: DEVPKEY_Device_FriendlyName.pid,
            };
            let value = props.GetValue(&key).ok()?.to_string();
            (!value.is_empty()).then_some(value)
        }
    }

    fn default_id(enumerator: &IMMDeviceEnumerator) -> Option<String> {
        unsafe {
            let device = enumerator.GetDefaultAudioEndpoint(eCapture, eConsole).ok()?;
            Self::device_id(&device).ok()
        }
    }
}

impl AudioBackend for WasapiBackend {
    fn list_devices(&self) -> Result<Vec<AudioDevice>, AudioError> {
        let _com = ComGuard::new()?;
        let enumerator = Self::enumerator()?;
        let default_id = Self::default_id(&enumerator);

        unsafe {
            let collection = enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .map_err(|e| windows_error("failed to enumerate devices", e))?;
            let count = collection
                .GetCount()
                .map_err(|e| windows_error("failed to count devices", e))?;

            let mut devices = Vec::with_capacity(count as usize);
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Ok(id) = Self::device_id(&device) else {
                    continue;
                };
                let name = Self::friendly_name(&device)
                    .unwrap_or_else(|| format!("Microphone {}", i + 1));
                devices.push(AudioDevice {
                    is_default: default_id.as_deref() == Some(id.as_str()),
                    id,
                    name,
                });
            }
            Ok(devices)
        }
    }

    fn default_device(&self) -> Result<Option<AudioDevice>, AudioError> {
        let _com = ComGuard::new()?;
        let enumerator = Self::enumerator()?;

        let device = match unsafe { enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) } {
            Ok(device) => device,
            Err(_) => return Ok(None),
        };
        let id = Self::device_id(&device)?;
        Ok(Some(AudioDevice {
            name: Self::friendly_name(&device).unwrap_or_else(|| "Default Microphone".to_string()),
            id,
            is_default: true,
        }))
    }

    fn get_mute(&self, device_id: &str) -> Result<bool, AudioError> {
        let _com = ComGuard::new()?;
        let device = Self::device(&Self::enumerator()?, device_id)?;
        let volume = Self::endpoint_volume(&device)?;
        unsafe {
            let muted = volume
                .GetMute()
                .map_err(|e| windows_error("failed to read mute state", e))?;
            Ok(muted.as_bool())
        }
    }

    fn set_mute(&self, device_id: &str, muted: bool) -> Result<(), AudioError> {
        let _com = ComGuard::new()?;
        let device = Self::device(&Self::enumerator()?, device_id)?;
        let volume = Self::endpoint_volume(&device)?;
        unsafe {
            volume
                .SetMute(muted, std::ptr::null())
                .map_err(|e| windows_error("failed to set mute state", e))
        }
    }
}

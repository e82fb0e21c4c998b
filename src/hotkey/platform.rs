//! OS global hotkey manager and its event pump
//!
//! The platform manager must live on the thread that pumps its events
//! (a Win32 message queue on Windows, the main CFRunLoop on macOS), so the
//! pump owns it and serves (un)registration requests over a channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tracing::{debug, info, warn};

use super::keys::Binding;
use super::registry::{HotkeyBackend, HotkeyError};

const PUMP_INTERVAL: Duration = Duration::from_millis(10);

type Reply = Sender<Result<(), HotkeyError>>;

enum PumpRequest {
    Register { binding: Binding, reply: Reply },
    Unregister { binding: Binding, reply: Reply },
}

/// `HotkeyBackend` that forwards to the pump thread and waits for its answer
pub struct GlobalHotkeyBackend {
    requests: Mutex<Sender<PumpRequest>>,
}

impl GlobalHotkeyBackend {
    fn call(&self, request: impl FnOnce(Reply) -> PumpRequest) -> Result<(), HotkeyError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .send(request(reply_tx))
            .map_err(|_| HotkeyError::Backend("hotkey pump has stopped".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| HotkeyError::Backend("hotkey pump dropped the request".to_string()))?
    }
}

impl HotkeyBackend for GlobalHotkeyBackend {
    fn register(&self, binding: &Binding) -> Result<(), HotkeyError> {
        let binding = binding.clone();
        self.call(|reply| PumpRequest::Register { binding, reply })
    }

    fn unregister(&self, binding: &Binding) -> Result<(), HotkeyError> {
        let binding = binding.clone();
        self.call(|reply| PumpRequest::Unregister { binding, reply })
    }
}

/// Owns the OS hotkey manager; run it on the process main thread
pub struct HotkeyPump {
    manager: GlobalHotKeyManager,
    requests: Receiver<PumpRequest>,
    presses: Sender<Binding>,
    bound: HashMap<u32, (HotKey, Binding)>,
}

impl HotkeyPump {
    /// Create the platform manager. Must be called on the thread that will
    /// later call [`HotkeyPump::run`].
    pub fn new(presses: Sender<Binding>) -> Result<(Self, GlobalHotkeyBackend), HotkeyError> {
        let manager = GlobalHotKeyManager::new()
            .map_err(|e| HotkeyError::Backend(format!("failed to create hotkey manager: {e}")))?;
        let (request_tx, request_rx) = mpsc::channel();

        let pump = Self {
            manager,
            requests: request_rx,
            presses,
            bound: HashMap::new(),
        };
        let backend = GlobalHotkeyBackend {
            requests: Mutex::new(request_tx),
        };
        Ok((pump, backend))
    }

    /// Pump platform events until `running` is cleared.
    pub fn run(mut self, running: &AtomicBool) {
        info!("hotkey pump started");

        while running.load(Ordering::SeqCst) {
            while let Ok(request) = self.requests.try_recv() {
                self.handle_request(request);
            }

            while let Ok(event) = GlobalHotKeyEvent::receiver().try_recv() {
                self.handle_event(event);
            }

            pump_platform_events(PUMP_INTERVAL);
        }

        for (_, (hotkey, binding)) in self.bound.drain() {
            if let Err(e) = self.manager.unregister(hotkey) {
                warn!(%binding, error = %e, "failed to release hotkey on exit");
            }
        }
        info!("hotkey pump stopped");
    }

    fn handle_request(&mut self, request: PumpRequest) {
        match request {
            PumpRequest::Register { binding, reply } => {
                let _ = reply.send(self.register(binding));
            }
            PumpRequest::Unregister { binding, reply } => {
                let _ = reply.send(self.unregister(&binding));
            }
        }
    }

    fn register(&mut self, binding: Binding) -> Result<(), HotkeyError> {
        let hotkey = to_hotkey(&binding)?;
        self.manager
            .register(hotkey)
            .map_err(|e| map_manager_error(e, &binding))?;
        debug!(%binding, id = hotkey.id(), "bound with OS");
        self.bound.insert(hotkey.id(), (hotkey, binding));
        Ok(())
    }

    fn unregister(&mut self, binding: &Binding) -> Result<(), HotkeyError> {
        let hotkey = to_hotkey(binding)?;
        if self.bound.remove(&hotkey.id()).is_none() {
            return Ok(());
        }
        self.manager
            .unregister(hotkey)
            .map_err(|e| HotkeyError::Backend(e.to_string()))
    }

    fn handle_event(&self, event: GlobalHotKeyEvent) {
        // toggle on press only, never on release
        if !matches!(event.state, HotKeyState::Pressed) {
            return;
        }
        if let Some((_, binding)) = self.bound.get(&event.id) {
            if self.presses.send(binding.clone()).is_err() {
                warn!("hotkey listener is gone, dropping press");
            }
        }
    }
}

fn to_hotkey(binding: &Binding) -> Result<HotKey, HotkeyError> {
    binding
        .to_string()
        .parse::<HotKey>()
        .map_err(|e| HotkeyError::InvalidKey(format!("{binding}: {e}")))
}

fn map_manager_error(error: global_hotkey::Error, binding: &Binding) -> HotkeyError {
    match error {
        global_hotkey::Error::AlreadyRegistered(_) | global_hotkey::Error::FailedToRegister(_) => {
            HotkeyError::Conflict {
                binding: binding.to_string(),
            }
        }
        other => HotkeyError::Backend(other.to_string()),
    }
}

#[cfg(windows)]
fn pump_platform_events(wait: Duration) {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE,
    };

    let mut msg = MSG::default();
    unsafe {
        while PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
    std::thread::sleep(wait);
}

#[cfg(target_os = "macos")]
fn pump_platform_events(wait: Duration) {
    use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop};

    unsafe {
        CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, wait, true);
    }
}

#[cfg(not(any(windows, target_os = "macos")))]
fn pump_platform_events(wait: Duration) {
    // X11 grabs are serviced on the hotkey crate's own thread
    std::thread::sleep(wait);
}

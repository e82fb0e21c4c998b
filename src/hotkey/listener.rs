//! Hotkey press dispatcher
//!
//! Receives pressed bindings from the platform pump and fires the
//! registry callback. Runs on a dedicated thread so a registry lock held
//! during (un)registration never stalls the platform event loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use super::keys::Binding;
use super::registry::{HotkeyError, HotkeyRegistry};

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Forwards pressed bindings to the registry on its own thread
pub struct HotkeyListener {
    presses: Mutex<Option<Receiver<Binding>>>,
    registry: Arc<HotkeyRegistry>,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    /// Create a new hotkey listener
    pub fn new(presses: Receiver<Binding>, registry: Arc<HotkeyRegistry>) -> Self {
        Self {
            presses: Mutex::new(Some(presses)),
            registry,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the dispatch thread. It runs until `stop()` is called or the
    /// press channel closes.
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let presses = self
            .presses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(presses) = presses else {
            self.running.store(false, Ordering::SeqCst);
            return Err(HotkeyError::AlreadyRunning);
        };

        let registry = Arc::clone(&self.registry);
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");
                run_dispatch_loop(presses, registry, running.clone());
                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| {
                error!(?e, "failed to spawn hotkey listener");
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// Stop the hotkey listener
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn run_dispatch_loop(
    presses: Receiver<Binding>,
    registry: Arc<HotkeyRegistry>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match presses.recv_timeout(STOP_CHECK_INTERVAL) {
            Ok(binding) => {
                if !registry.dispatch(&binding) {
                    debug!(%binding, "press for a binding that is no longer registered");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

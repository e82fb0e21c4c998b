//! togmic-daemon: Background daemon for profile-driven microphone muting
//!
//! This daemon provides:
//! - Global toggle hotkeys bound per profile
//! - A serialized controller owning the active profile and mute state
//! - Polling reconciliation with mute changes made outside the daemon
//! - Audible feedback on mute changes
//! - IPC server for the settings UI and tray
//!
//! The process main thread owns the OS hotkey manager and pumps its events;
//! everything async runs on a tokio runtime on a separate thread.

mod audio;
mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod profile;
mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, ConfigStore, JsonFileStore};
use crate::events::feedback::{self, SystemPlayer};
use crate::events::NotificationSink;
use crate::hotkey::{
    Binding, DetachedBackend, HotkeyBackend, HotkeyListener, HotkeyPump, HotkeyRegistry,
};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::state::{Collaborators, Controller, MuteStateStore, PollingWatcher};

const EVENT_CAPACITY: usize = 64;
const IDLE_WAIT: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "togmic-daemon starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        ?config.state_file,
        backend = ?config.audio_backend,
        "configuration loaded"
    );

    // Hotkey pump (main thread) -> listener thread -> registry callback
    let (press_tx, press_rx) = std::sync::mpsc::channel();
    let (pump, hotkeys): (Option<HotkeyPump>, Arc<dyn HotkeyBackend>) =
        match HotkeyPump::new(press_tx) {
            Ok((pump, backend)) => (Some(pump), Arc::new(backend)),
            Err(e) => {
                error!(error = %e, "failed to create hotkey manager");
                warn!("continuing without global hotkeys - toggles only via IPC");
                (None, Arc::new(DetachedBackend))
            }
        };

    let running = Arc::new(AtomicBool::new(true));
    let runtime_running = Arc::clone(&running);
    let runtime = thread::Builder::new()
        .name("togmic-runtime".to_string())
        .spawn(move || {
            let result = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build tokio runtime")
                .and_then(|runtime| runtime.block_on(serve(config, hotkeys, press_rx)));
            runtime_running.store(false, Ordering::SeqCst);
            result
        })
        .context("failed to spawn runtime thread")?;

    match pump {
        Some(pump) => pump.run(&running),
        None => {
            while running.load(Ordering::SeqCst) {
                thread::sleep(IDLE_WAIT);
            }
        }
    }

    let result = runtime
        .join()
        .map_err(|_| anyhow!("runtime thread panicked"))?;

    info!("togmic-daemon stopped");
    result
}

/// Wire up every async component and run until a shutdown signal
async fn serve(
    config: Config,
    hotkeys: Arc<dyn HotkeyBackend>,
    presses: Receiver<Binding>,
) -> Result<()> {
    let shutdown = ShutdownSignal::new();

    let file_store = JsonFileStore::new(&config.state_file);
    let stored = file_store.load_or_default();
    let config_store: Arc<dyn ConfigStore> = Arc::new(file_store);
    info!(
        profiles = stored.profiles.len(),
        active = ?stored.active_profile_id,
        "stored configuration loaded"
    );

    let audio = audio::create_backend(config.audio_backend);
    let sink = NotificationSink::new(EVENT_CAPACITY);
    let store = Arc::new(MuteStateStore::new(false, sink.clone()));
    let registry = Arc::new(HotkeyRegistry::new(hotkeys));

    let listener = HotkeyListener::new(presses, Arc::clone(&registry));
    match listener.start() {
        Ok(()) => info!("hotkey listener started"),
        Err(e) => error!(error = %e, "failed to start hotkey listener"),
    }

    let (controller, handle) = Controller::new(
        stored,
        Collaborators {
            audio: Arc::clone(&audio),
            registry,
            store,
            config: config_store,
            sink: sink.clone(),
        },
    );
    let controller_task = tokio::spawn(controller.run());

    tokio::spawn(feedback::run(
        sink.subscribe(),
        handle.watch_settings(),
        Arc::new(SystemPlayer),
    ));

    if let Err(e) = handle.restore().await {
        warn!(code = e.code(), error = %e, "failed to restore active profile");
    }

    tokio::spawn(PollingWatcher::new(handle.clone(), audio).run());

    let server = Server::bind(&config.socket_path, handle.clone())?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "signal handling failed"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "controller did not shut down cleanly");
    }
    if let Err(e) = controller_task.await {
        warn!(?e, "controller task failed");
    }
    if listener.is_running() {
        listener.stop();
    }
    server.shutdown().await;

    Ok(())
}

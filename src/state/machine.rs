//! Profile activation controller
//!
//! One actor task owns the active profile and is the only writer of the
//! mute state. Every mutation arrives as a [`Command`] on its channel, so
//! activation, deactivation, toggles, explicit sets and poll reconciliation
//! never interleave. Device and hotkey I/O runs on the blocking pool while
//! the actor awaits it.
//!
//! States:
//! - Inactive: no profile, no hotkeys registered
//! - Active(profile): the profile's toggle key is bound

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::MuteStateStore;
use crate::audio::{self, AudioBackend, AudioDevice, AudioError, MuteOutcome};
use crate::config::{AppSettings, ConfigError, ConfigStore, StoredConfig};
use crate::events::{ChangeSource, NotificationSink, StateEvent};
use crate::hotkey::{HotkeyCallback, HotkeyError, HotkeyRegistry, KeySpec};
use crate::profile::{HotkeyProfile, ProfileError};

const COMMAND_BUFFER: usize = 64;

/// Which profile, if any, currently owns the hotkeys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Inactive,
    Active(HotkeyProfile),
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Inactive => write!(f, "Inactive"),
            ControllerState::Active(profile) => write!(f, "Active({})", profile.id),
        }
    }
}

/// The active profile as seen from outside the actor.
///
/// `epoch` changes before and after every mutation; a reading taken under
/// one epoch is only applied if the epoch is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSnapshot {
    pub profile: HotkeyProfile,
    pub epoch: u64,
}

/// Errors surfaced by controller operations
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Hotkey(#[from] HotkeyError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("invalid profile: {0}")]
    InvalidProfile(#[from] ProfileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no profile is active")]
    NoActiveProfile,

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("controller is not running")]
    Stopped,

    #[error("background task failed: {0}")]
    Task(String),
}

impl ControlError {
    /// Stable machine-readable code for IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Hotkey(HotkeyError::Conflict { .. }) => "hotkey_conflict",
            ControlError::Hotkey(HotkeyError::InvalidKey(_)) => "invalid_profile",
            ControlError::Hotkey(_) => "hotkey_error",
            ControlError::Audio(AudioError::DeviceUnavailable { .. }) => "device_unavailable",
            ControlError::Audio(_) => "audio_backend_error",
            ControlError::InvalidProfile(_) => "invalid_profile",
            ControlError::Config(_) => "config_io_error",
            ControlError::NoActiveProfile => "no_active_profile",
            ControlError::ProfileNotFound(_) => "profile_not_found",
            ControlError::Stopped => "controller_stopped",
            ControlError::Task(_) => "internal_error",
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, ControlError>>;

/// Messages processed by the controller actor
pub enum Command {
    Activate {
        profile: HotkeyProfile,
        reply: Reply<()>,
    },
    ActivateById {
        id: String,
        reply: Reply<HotkeyProfile>,
    },
    Deactivate {
        reply: Reply<()>,
    },
    Toggle {
        source: ChangeSource,
        /// `None` for hotkey presses, which nobody waits on
        reply: Option<Reply<bool>>,
    },
    SetMute {
        muted: bool,
        silent: bool,
        reply: Reply<()>,
    },
    Reconcile {
        epoch: u64,
        muted: bool,
    },
    Restore {
        reply: Reply<()>,
    },
    SaveProfile {
        profile: HotkeyProfile,
        reply: Reply<()>,
    },
    DeleteProfile {
        id: String,
        reply: Reply<()>,
    },
    ListProfiles {
        reply: Reply<Vec<HotkeyProfile>>,
    },
    UpdateSettings {
        settings: AppSettings,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Everything the controller drives
pub struct Collaborators {
    pub audio: Arc<dyn AudioBackend>,
    pub registry: Arc<HotkeyRegistry>,
    pub store: Arc<MuteStateStore>,
    pub config: Arc<dyn ConfigStore>,
    pub sink: NotificationSink,
}

/// The serialized owner of ActiveProfile
pub struct Controller {
    state: ControllerState,
    stored: StoredConfig,
    audio: Arc<dyn AudioBackend>,
    registry: Arc<HotkeyRegistry>,
    store: Arc<MuteStateStore>,
    config: Arc<dyn ConfigStore>,
    sink: NotificationSink,
    epoch: u64,
    active_tx: watch::Sender<Option<ActiveSnapshot>>,
    settings_tx: watch::Sender<AppSettings>,
    /// OS bindings held, readable without touching the registry lock
    hotkeys_tx: watch::Sender<usize>,
    /// Weak so the hotkey callback never keeps the actor alive
    commands: mpsc::WeakSender<Command>,
    rx: mpsc::Receiver<Command>,
}

impl Controller {
    /// Create the actor and the first handle to it.
    ///
    /// The actor stops once every handle is dropped.
    pub fn new(stored: StoredConfig, deps: Collaborators) -> (Self, ControllerHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (active_tx, active_rx) = watch::channel(None);
        let (settings_tx, settings_rx) = watch::channel(stored.app_settings.clone());
        let (hotkeys_tx, hotkeys_rx) = watch::channel(0);

        let handle = ControllerHandle {
            tx: tx.clone(),
            audio: Arc::clone(&deps.audio),
            store: Arc::clone(&deps.store),
            sink: deps.sink.clone(),
            active_rx,
            settings_rx,
            hotkeys_rx,
        };

        let controller = Self {
            state: ControllerState::Inactive,
            stored,
            audio: deps.audio,
            registry: deps.registry,
            store: deps.store,
            config: deps.config,
            sink: deps.sink,
            epoch: 0,
            active_tx,
            settings_tx,
            hotkeys_tx,
            commands: tx.downgrade(),
            rx,
        };

        (controller, handle)
    }

    /// Process commands until every handle is gone or shutdown is requested
    pub async fn run(mut self) {
        info!(state = %self.state, "controller started");

        while let Some(command) = self.rx.recv().await {
            if !self.handle(command).await {
                break;
            }
        }

        info!("controller stopped");
    }

    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Activate { profile, reply } => {
                let _ = reply.send(self.activate(profile).await);
            }
            Command::ActivateById { id, reply } => {
                let _ = reply.send(self.activate_by_id(&id).await);
            }
            Command::Deactivate { reply } => {
                let _ = reply.send(self.deactivate().await);
            }
            Command::Toggle { source, reply } => {
                let result = self.toggle(source).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(error = %e, "hotkey toggle failed");
                        }
                    }
                }
            }
            Command::SetMute {
                muted,
                silent,
                reply,
            } => {
                let _ = reply.send(self.set_mute(muted, silent).await);
            }
            Command::Reconcile { epoch, muted } => self.reconcile(epoch, muted),
            Command::Restore { reply } => {
                let _ = reply.send(self.restore().await);
            }
            Command::SaveProfile { profile, reply } => {
                let _ = reply.send(self.save_profile(profile).await);
            }
            Command::DeleteProfile { id, reply } => {
                let _ = reply.send(self.delete_profile(&id).await);
            }
            Command::ListProfiles { reply } => {
                let _ = reply.send(Ok(self.stored.profiles.clone()));
            }
            Command::UpdateSettings { settings, reply } => {
                let _ = reply.send(self.update_settings(settings).await);
            }
            Command::Shutdown { reply } => {
                self.release().await;
                let _ = reply.send(Ok(()));
                return false;
            }
        }
        true
    }

    fn snapshot(&self) -> Option<ActiveSnapshot> {
        match &self.state {
            ControllerState::Inactive => None,
            ControllerState::Active(profile) => Some(ActiveSnapshot {
                profile: profile.clone(),
                epoch: self.epoch,
            }),
        }
    }

    /// Invalidate readings taken before this point and republish the snapshot
    fn bump(&mut self) {
        self.epoch += 1;
        self.active_tx.send_replace(self.snapshot());
    }

    fn active_profile(&self) -> Result<HotkeyProfile, ControlError> {
        match &self.state {
            ControllerState::Active(profile) => Ok(profile.clone()),
            ControllerState::Inactive => Err(ControlError::NoActiveProfile),
        }
    }

    fn toggle_callback(&self) -> HotkeyCallback {
        let commands = self.commands.clone();
        Arc::new(move || {
            let Some(tx) = commands.upgrade() else {
                return;
            };
            let command = Command::Toggle {
                source: ChangeSource::Hotkey,
                reply: None,
            };
            if let Err(e) = tx.try_send(command) {
                warn!(error = %e, "dropping hotkey press");
            }
        })
    }

    async fn activate(&mut self, profile: HotkeyProfile) -> Result<(), ControlError> {
        let spec = profile.validate()?;
        self.bump();
        let result = self.swap_to(profile, spec).await;
        self.bump();
        result
    }

    /// unregister previous, register new, read state, become Active
    async fn swap_to(&mut self, profile: HotkeyProfile, spec: KeySpec) -> Result<(), ControlError> {
        if let Err(e) = self.register(spec, profile.ignore_modifiers).await {
            warn!(profile = %profile.id, error = %e, "activation failed");
            self.rebind_previous().await;
            return Err(e);
        }

        match self.read_state(&profile).await {
            Ok(muted) => {
                self.store.apply(muted, ChangeSource::Activation, true);
            }
            Err(e) => {
                // nothing readable counts as unmuted, like a mixed set
                warn!(profile = %profile.id, error = %e, "could not read mute state on activation");
                self.store.apply(false, ChangeSource::Activation, true);
            }
        }

        info!(
            from = %self.state,
            profile = %profile.id,
            selector = %profile.device_selector,
            "profile activated"
        );
        self.state = ControllerState::Active(profile.clone());
        self.sink.publish(StateEvent::ProfileActivated {
            profile_id: profile.id.clone(),
        });

        self.stored.active_profile_id = Some(profile.id.clone());
        self.stored.upsert_profile(profile);
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist active profile");
        }
        Ok(())
    }

    /// Put the still-current profile's hotkeys back after a failed swap
    async fn rebind_previous(&mut self) {
        let ControllerState::Active(previous) = &self.state else {
            return;
        };
        let previous = previous.clone();

        let result = match previous.key_spec() {
            Ok(spec) => self.register(spec, previous.ignore_modifiers).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            error!(profile = %previous.id, error = %e, "could not restore previous hotkeys, deactivating");
            self.state = ControllerState::Inactive;
            self.sink.publish(StateEvent::ProfileDeactivated);
        }
    }

    async fn activate_by_id(&mut self, id: &str) -> Result<HotkeyProfile, ControlError> {
        let profile = self
            .stored
            .profile(id)
            .cloned()
            .ok_or_else(|| ControlError::ProfileNotFound(id.to_string()))?;
        self.activate(profile.clone()).await?;
        Ok(profile)
    }

    async fn deactivate(&mut self) -> Result<(), ControlError> {
        if self.state == ControllerState::Inactive {
            debug!("deactivate while inactive");
            return Ok(());
        }

        self.bump();
        self.release().await;
        self.bump();

        self.stored.active_profile_id = None;
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist deactivation");
        }
        Ok(())
    }

    /// Unregister everything and go Inactive without touching the stored config
    async fn release(&mut self) {
        if self.state == ControllerState::Inactive {
            return;
        }
        let registry = Arc::clone(&self.registry);
        if let Err(e) = blocking(move || {
            registry.unregister_all();
            Ok(())
        })
        .await
        {
            warn!(error = %e, "failed to unregister hotkeys");
        }
        self.hotkeys_tx.send_replace(0);

        info!(from = %self.state, "profile deactivated");
        self.state = ControllerState::Inactive;
        self.sink.publish(StateEvent::ProfileDeactivated);
    }

    async fn toggle(&mut self, source: ChangeSource) -> Result<bool, ControlError> {
        let profile = self.active_profile()?;
        let next = !self.store.current();

        self.bump();
        let result = self.write_mute(&profile, next).await;
        self.bump();

        result?;
        self.store.apply(next, source, false);
        Ok(next)
    }

    async fn set_mute(&mut self, muted: bool, silent: bool) -> Result<(), ControlError> {
        let profile = self.active_profile()?;

        self.bump();
        let result = self.write_mute(&profile, muted).await;
        self.bump();

        result?;
        self.store.apply(muted, ChangeSource::Explicit, silent);
        Ok(())
    }

    fn reconcile(&mut self, epoch: u64, muted: bool) {
        if epoch != self.epoch || self.state == ControllerState::Inactive {
            debug!(epoch, current = self.epoch, "dropping stale poll reading");
            return;
        }
        self.store.apply(muted, ChangeSource::Poll, true);
    }

    async fn restore(&mut self) -> Result<(), ControlError> {
        let Some(id) = self.stored.active_profile_id.clone() else {
            info!("no active profile to restore");
            return Ok(());
        };

        info!(profile = %id, "restoring active profile");
        self.activate_by_id(&id).await?;

        if self.stored.app_settings.start_muted {
            self.set_mute(true, true).await?;
        }
        Ok(())
    }

    async fn save_profile(&mut self, profile: HotkeyProfile) -> Result<(), ControlError> {
        profile.validate()?;

        let is_active = matches!(&self.state, ControllerState::Active(active) if active.id == profile.id);
        if is_active {
            self.activate(profile.clone()).await?;
        }

        let replaced = self.stored.upsert_profile(profile);
        debug!(replaced, "profile saved");
        self.persist().await
    }

    async fn delete_profile(&mut self, id: &str) -> Result<(), ControlError> {
        if self.stored.remove_profile(id).is_none() {
            return Err(ControlError::ProfileNotFound(id.to_string()));
        }

        if matches!(&self.state, ControllerState::Active(active) if active.id == id) {
            self.bump();
            self.release().await;
            self.bump();
        }
        if self.stored.active_profile_id.as_deref() == Some(id) {
            self.stored.active_profile_id = None;
        }

        info!(profile = %id, "profile deleted");
        self.persist().await
    }

    async fn update_settings(&mut self, settings: AppSettings) -> Result<(), ControlError> {
        self.stored.app_settings = settings.clone();
        self.settings_tx.send_replace(settings);
        self.persist().await
    }

    async fn register(&self, spec: KeySpec, ignore_modifiers: bool) -> Result<(), ControlError> {
        let registry = Arc::clone(&self.registry);
        let callback = self.toggle_callback();
        let result = blocking(move || {
            Ok(registry.register(&spec, ignore_modifiers, callback)?.len())
        })
        .await;
        // a failed registration leaves nothing bound
        self.hotkeys_tx.send_replace(result.as_ref().copied().unwrap_or(0));
        result.map(|_| ())
    }

    async fn read_state(&self, profile: &HotkeyProfile) -> Result<bool, ControlError> {
        let backend = Arc::clone(&self.audio);
        let selector = profile.device_selector.clone();
        blocking(move || Ok(audio::selector_state(backend.as_ref(), &selector)?)).await
    }

    async fn write_mute(&self, profile: &HotkeyProfile, muted: bool) -> Result<MuteOutcome, ControlError> {
        let backend = Arc::clone(&self.audio);
        let selector = profile.device_selector.clone();
        let outcome =
            blocking(move || Ok(audio::set_selector_mute(backend.as_ref(), &selector, muted)?)).await?;

        if outcome.skipped > 0 {
            warn!(
                profile = %profile.id,
                applied = outcome.applied,
                skipped = outcome.skipped,
                "mute applied to part of the device set"
            );
        }
        Ok(outcome)
    }

    async fn persist(&self) -> Result<(), ControlError> {
        let config = Arc::clone(&self.config);
        let stored = self.stored.clone();
        blocking(move || Ok(config.save(&stored)?)).await
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ControlError>
where
    F: FnOnce() -> Result<T, ControlError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ControlError::Task(e.to_string()))?
}

/// Cloneable front door to the controller
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
    audio: Arc<dyn AudioBackend>,
    store: Arc<MuteStateStore>,
    sink: NotificationSink,
    active_rx: watch::Receiver<Option<ActiveSnapshot>>,
    settings_rx: watch::Receiver<AppSettings>,
    hotkeys_rx: watch::Receiver<usize>,
}

impl ControllerHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, ControlError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ControlError::Stopped)?;
        response.await.map_err(|_| ControlError::Stopped)?
    }

    /// Current aggregate mute state, without a round trip to the actor
    pub fn mute_state(&self) -> bool {
        self.store.current()
    }

    /// Flip the active profile's devices; returns the new state
    pub async fn toggle_mute(&self) -> Result<bool, ControlError> {
        self.request(|reply| Command::Toggle {
            source: ChangeSource::Toggle,
            reply: Some(reply),
        })
        .await
    }

    pub async fn set_mute(&self, muted: bool, silent: bool) -> Result<(), ControlError> {
        self.request(|reply| Command::SetMute {
            muted,
            silent,
            reply,
        })
        .await
    }

    pub async fn set_active_profile(&self, profile: HotkeyProfile) -> Result<(), ControlError> {
        self.request(|reply| Command::Activate { profile, reply })
            .await
    }

    pub async fn activate_profile(&self, id: String) -> Result<HotkeyProfile, ControlError> {
        self.request(|reply| Command::ActivateById { id, reply })
            .await
    }

    pub async fn deactivate_profile(&self) -> Result<(), ControlError> {
        self.request(|reply| Command::Deactivate { reply }).await
    }

    pub fn active_profile(&self) -> Option<HotkeyProfile> {
        self.active_snapshot().map(|snapshot| snapshot.profile)
    }

    pub fn active_snapshot(&self) -> Option<ActiveSnapshot> {
        self.active_rx.borrow().clone()
    }

    /// Enumerate input devices. Read-only, so it skips the actor queue.
    pub async fn audio_devices(&self) -> Result<Vec<AudioDevice>, ControlError> {
        let backend = Arc::clone(&self.audio);
        blocking(move || Ok(backend.list_devices()?)).await
    }

    pub async fn list_profiles(&self) -> Result<Vec<HotkeyProfile>, ControlError> {
        self.request(|reply| Command::ListProfiles { reply }).await
    }

    pub async fn save_profile(&self, profile: HotkeyProfile) -> Result<(), ControlError> {
        self.request(|reply| Command::SaveProfile { profile, reply })
            .await
    }

    pub async fn delete_profile(&self, id: String) -> Result<(), ControlError> {
        self.request(|reply| Command::DeleteProfile { id, reply })
            .await
    }

    pub fn settings(&self) -> AppSettings {
        self.settings_rx.borrow().clone()
    }

    pub fn watch_settings(&self) -> watch::Receiver<AppSettings> {
        self.settings_rx.clone()
    }

    pub async fn update_settings(&self, settings: AppSettings) -> Result<(), ControlError> {
        self.request(|reply| Command::UpdateSettings { settings, reply })
            .await
    }

    /// Activate the persisted profile and apply `startMuted`
    pub async fn restore(&self) -> Result<(), ControlError> {
        self.request(|reply| Command::Restore { reply }).await
    }

    /// Release hotkeys and stop the actor. The stored active profile is kept.
    pub async fn shutdown(&self) -> Result<(), ControlError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Submit a poll reading taken under `epoch`
    pub async fn reconcile(&self, epoch: u64, muted: bool) -> Result<(), ControlError> {
        self.tx
            .send(Command::Reconcile { epoch, muted })
            .await
            .map_err(|_| ControlError::Stopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.sink.subscribe()
    }

    /// Number of OS-level bindings currently held
    pub fn registered_hotkeys(&self) -> usize {
        *self.hotkeys_rx.borrow()
    }
}

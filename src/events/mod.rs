//! State-change events and their fan-out
//!
//! Every observer (IPC subscribers, audible feedback, the log) takes its
//! own receiver from the [`NotificationSink`], so one published change
//! reaches each of them exactly once.

pub mod feedback;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// What caused a mute change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// Global hotkey press
    Hotkey,
    /// Explicit toggle request (UI button, tray)
    Toggle,
    /// Explicit set to a specific value
    Explicit,
    /// State read while activating a profile
    Activation,
    /// Drift picked up by the poller
    Poll,
}

/// Events emitted by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Aggregate mute state of the active device set changed
    MuteChanged {
        muted: bool,
        source: ChangeSource,
        /// Observers should skip audible feedback
        silent: bool,
    },

    /// A profile became active and its hotkeys are bound
    ProfileActivated { profile_id: String },

    /// No profile is active any more
    ProfileDeactivated,
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::MuteChanged { muted: true, .. } => write!(f, "MUTED"),
            StateEvent::MuteChanged { muted: false, .. } => write!(f, "UNMUTED"),
            StateEvent::ProfileActivated { profile_id } => {
                write!(f, "PROFILE_ACTIVATED ({})", profile_id)
            }
            StateEvent::ProfileDeactivated => write!(f, "PROFILE_DEACTIVATED"),
        }
    }
}

/// Broadcasts state events to every subscribed observer
#[derive(Clone)]
pub struct NotificationSink {
    tx: broadcast::Sender<StateEvent>,
}

impl NotificationSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: StateEvent) {
        debug!(%event, "publishing state event");
        // no subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.tx.subscribe()
    }
}

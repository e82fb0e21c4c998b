//! The single authoritative mute flag
//!
//! Readers take the atomic without locking. Writers go through
//! [`MuteStateStore::apply`], which compares, stores and publishes under one
//! short mutex so notifications leave in the same order values are stored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::info;

use crate::events::{ChangeSource, NotificationSink, StateEvent};

pub struct MuteStateStore {
    muted: AtomicBool,
    write: Mutex<()>,
    sink: NotificationSink,
}

impl MuteStateStore {
    pub fn new(initial: bool, sink: NotificationSink) -> Self {
        Self {
            muted: AtomicBool::new(initial),
            write: Mutex::new(()),
            sink,
        }
    }

    /// Current aggregate mute state. Never blocks.
    pub fn current(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Store `muted` and notify observers, only if it differs.
    ///
    /// Returns whether the value changed.
    pub fn apply(&self, muted: bool, source: ChangeSource, silent: bool) -> bool {
        let _guard = self
            .write
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.muted.load(Ordering::SeqCst) == muted {
            return false;
        }
        self.muted.store(muted, Ordering::SeqCst);

        info!(muted, ?source, silent, "mute state changed");
        self.sink.publish(StateEvent::MuteChanged {
            muted,
            source,
            silent,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_twice_notifies_once() {
        let sink = NotificationSink::new(8);
        let mut rx = sink.subscribe();
        let store = MuteStateStore::new(false, sink);

        assert!(store.apply(true, ChangeSource::Explicit, false));
        assert!(!store.apply(true, ChangeSource::Explicit, false));
        assert!(store.current());

        assert_eq!(
            rx.try_recv().unwrap(),
            StateEvent::MuteChanged {
                muted: true,
                source: ChangeSource::Explicit,
                silent: false,
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unchanged_value_is_quiet() {
        let sink = NotificationSink::new(8);
        let mut rx = sink.subscribe();
        let store = MuteStateStore::new(true, sink);

        assert!(!store.apply(true, ChangeSource::Poll, true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_silent_flag_is_carried() {
        let sink = NotificationSink::new(8);
        let mut rx = sink.subscribe();
        let store = MuteStateStore::new(false, sink);

        store.apply(true, ChangeSource::Explicit, true);

        assert!(matches!(
            rx.try_recv().unwrap(),
            StateEvent::MuteChanged { silent: true, .. }
        ));
    }
}

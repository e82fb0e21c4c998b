//! Periodic reconciliation with the OS mute state
//!
//! Picks up changes made outside the daemon (sound settings, another
//! application, a hardware mute switch). Device reads happen here, not in
//! the controller, so a slow device never holds up a toggle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::ControllerHandle;
use crate::audio::{self, AudioBackend};

/// Fixed polling period
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct PollingWatcher {
    handle: ControllerHandle,
    audio: Arc<dyn AudioBackend>,
    period: Duration,
}

impl PollingWatcher {
    pub fn new(handle: ControllerHandle, audio: Arc<dyn AudioBackend>) -> Self {
        Self {
            handle,
            audio,
            period: POLL_INTERVAL,
        }
    }

    /// Poll until the controller goes away
    pub async fn run(self) {
        info!(period_ms = self.period.as_millis() as u64, "polling watcher started");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !self.tick().await {
                break;
            }
        }

        info!("polling watcher stopped");
    }

    /// One reconciliation pass. Returns false once the controller is gone.
    async fn tick(&self) -> bool {
        let Some(snapshot) = self.handle.active_snapshot() else {
            return true;
        };

        let backend = Arc::clone(&self.audio);
        let selector = snapshot.profile.device_selector.clone();
        let reading =
            tokio::task::spawn_blocking(move || audio::selector_state(backend.as_ref(), &selector)).await;

        let muted = match reading {
            Ok(Ok(muted)) => muted,
            Ok(Err(e)) => {
                debug!(profile = %snapshot.profile.id, error = %e, "poll read failed");
                return true;
            }
            Err(e) => {
                debug!(error = %e, "poll task failed");
                return true;
            }
        };

        self.handle.reconcile(snapshot.epoch, muted).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::audio::MemoryBackend;
    use crate::config::StoredConfig;
    use crate::profile::{test_profile, DeviceSelector};
    use crate::state::machine::testing::spawn;

    #[tokio::test]
    async fn test_external_mute_is_picked_up() {
        let h = spawn(StoredConfig::default(), MemoryBackend::with_default_devices());
        assert_ok!(
            h.handle
                .set_active_profile(test_profile("p", "F9", DeviceSelector::DefaultMic))
                .await
        );
        tokio::spawn(PollingWatcher::new(h.handle.clone(), h.audio.clone()).run());

        h.audio.set_external_mute("memory-mic-1", true);

        let deadline = tokio::time::Instant::now() + POLL_INTERVAL * 3;
        while !h.handle.mute_state() {
            assert!(tokio::time::Instant::now() < deadline, "poll never reconciled");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_inactive_tick_is_a_no_op() {
        let h = spawn(StoredConfig::default(), MemoryBackend::with_default_devices());
        let watcher = PollingWatcher::new(h.handle.clone(), h.audio.clone());
        h.audio.set_external_mute("memory-mic-1", true);

        assert!(watcher.tick().await);
        assert!(!h.handle.mute_state());
    }

    #[tokio::test]
    async fn test_reconciled_change_is_silent() {
        let mut h = spawn(StoredConfig::default(), MemoryBackend::with_default_devices());
        assert_ok!(
            h.handle
                .set_active_profile(test_profile("p", "F9", DeviceSelector::AllMics))
                .await
        );
        let watcher = PollingWatcher::new(h.handle.clone(), h.audio.clone());
        h.audio.set_external_mute("memory-mic-1", true);
        h.audio.set_external_mute("memory-mic-2", true);

        assert!(watcher.tick().await);
        assert_ok!(h.handle.list_profiles().await);

        assert!(h.handle.mute_state());
        let silent_poll = std::iter::from_fn(|| h.events.try_recv().ok()).any(|event| {
            event
                == crate::events::StateEvent::MuteChanged {
                    muted: true,
                    source: crate::events::ChangeSource::Poll,
                    silent: true,
                }
        });
        assert!(silent_poll);
    }
}

//! Audible feedback for mute changes
//!
//! Two short tones (high for unmute, low for mute) are synthesised once as
//! in-memory PCM WAV files. Windows plays them asynchronously through
//! `PlaySoundW`; other platforms have no player and only log the cue.

use std::f32::consts::TAU;
use std::sync::{Arc, OnceLock};

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use super::StateEvent;
use crate::config::AppSettings;

const SAMPLE_RATE: u32 = 22_050;
const CUE_MS: u32 = 120;
const FADE_MS: u32 = 10;
const MUTE_HZ: f32 = 440.0;
const UNMUTE_HZ: f32 = 880.0;

/// Which tone to play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Muted,
    Unmuted,
}

impl Cue {
    fn for_state(muted: bool) -> Self {
        if muted {
            Cue::Muted
        } else {
            Cue::Unmuted
        }
    }

    /// WAV bytes for this cue, synthesised on first use
    pub fn wav(self) -> &'static [u8] {
        static MUTED: OnceLock<Vec<u8>> = OnceLock::new();
        static UNMUTED: OnceLock<Vec<u8>> = OnceLock::new();
        match self {
            Cue::Muted => MUTED.get_or_init(|| tone_wav(MUTE_HZ, CUE_MS)),
            Cue::Unmuted => UNMUTED.get_or_init(|| tone_wav(UNMUTE_HZ, CUE_MS)),
        }
    }
}

/// Something that can make the feedback sound. Must not block.
pub trait FeedbackPlayer: Send + Sync {
    fn play(&self, cue: Cue);
}

/// The platform's native sound playback
pub struct SystemPlayer;

#[cfg(windows)]
impl FeedbackPlayer for SystemPlayer {
    fn play(&self, cue: Cue) {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::HMODULE;
        use windows::Win32::Media::Audio::{PlaySoundW, SND_ASYNC, SND_MEMORY, SND_NODEFAULT};

        let wav = cue.wav();
        // SND_MEMORY: the "name" points at an in-memory WAV image
        let played = unsafe {
            PlaySoundW(
                PCWSTR(wav.as_ptr() as *const u16),
                HMODULE::default(),
                SND_MEMORY | SND_ASYNC | SND_NODEFAULT,
            )
        };
        if !played.as_bool() {
            warn!(?cue, "PlaySound failed");
        }
    }
}

#[cfg(not(windows))]
impl FeedbackPlayer for SystemPlayer {
    fn play(&self, cue: Cue) {
        tracing::debug!(?cue, bytes = cue.wav().len(), "no sound player on this platform");
    }
}

/// Play a cue for every non-silent mute change while feedback is enabled.
pub async fn run(
    mut events: broadcast::Receiver<StateEvent>,
    settings: watch::Receiver<AppSettings>,
    player: Arc<dyn FeedbackPlayer>,
) {
    info!("audible feedback started");

    loop {
        match events.recv().await {
            Ok(StateEvent::MuteChanged { muted, silent, .. }) => {
                if silent || !settings.borrow().sound_feedback {
                    continue;
                }
                player.play(Cue::for_state(muted));
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "feedback receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    info!("audible feedback stopped");
}

/// Mono 16-bit PCM WAV of a sine tone with short linear fades.
fn tone_wav(frequency: f32, duration_ms: u32) -> Vec<u8> {
    let samples = SAMPLE_RATE * duration_ms / 1000;
    let fade = SAMPLE_RATE * FADE_MS / 1000;
    let data_len = samples * 2;

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..samples {
        let envelope = (i.min(samples - 1 - i) as f32 / fade as f32).min(1.0);
        let t = i as f32 / SAMPLE_RATE as f32;
        let sample = (TAU * frequency * t).sin() * envelope * 0.4;
        wav.extend_from_slice(&((sample * i16::MAX as f32) as i16).to_le_bytes());
    }
    wav
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::events::{ChangeSource, NotificationSink};

    #[derive(Default)]
    struct RecordingPlayer {
        played: Mutex<Vec<Cue>>,
    }

    impl FeedbackPlayer for RecordingPlayer {
        fn play(&self, cue: Cue) {
            self.played.lock().unwrap().push(cue);
        }
    }

    fn mute_changed(muted: bool, silent: bool) -> StateEvent {
        StateEvent::MuteChanged {
            muted,
            source: ChangeSource::Toggle,
            silent,
        }
    }

    #[test]
    fn test_wav_header() {
        let wav = Cue::Muted.wav();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        let data_len = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]) as usize;
        assert_eq!(wav.len(), 44 + data_len);
        assert_ne!(Cue::Muted.wav(), Cue::Unmuted.wav());
    }

    #[tokio::test]
    async fn test_plays_only_non_silent_changes() {
        let sink = NotificationSink::new(16);
        let (_settings_tx, settings_rx) = watch::channel(AppSettings::default());
        let player = Arc::new(RecordingPlayer::default());
        let task = tokio::spawn(run(sink.subscribe(), settings_rx, player.clone()));

        sink.publish(mute_changed(true, false));
        sink.publish(mute_changed(false, true));
        sink.publish(StateEvent::ProfileDeactivated);
        sink.publish(mute_changed(false, false));
        drop(sink);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*player.played.lock().unwrap(), vec![Cue::Muted, Cue::Unmuted]);
    }

    #[tokio::test]
    async fn test_disabled_setting_mutes_feedback() {
        let sink = NotificationSink::new(16);
        let settings = AppSettings {
            sound_feedback: false,
            ..AppSettings::default()
        };
        let (_settings_tx, settings_rx) = watch::channel(settings);
        let player = Arc::new(RecordingPlayer::default());
        let task = tokio::spawn(run(sink.subscribe(), settings_rx, player.clone()));

        sink.publish(mute_changed(true, false));
        drop(sink);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(player.played.lock().unwrap().is_empty());
    }
}

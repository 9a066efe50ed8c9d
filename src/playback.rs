//! Playback of synthesized speech through a platform audio sink.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{debug, info, warn};

use crate::client::AudioRef;
use crate::error::VoiceError;

/// A short silent MP3 clip, played once on the first user gesture to
/// unlock audio output on platforms that gate autoplay.
const SILENT_CLIP_B64: &str = "SUQzBAAAAAAAI1RTU0UAAAAPAAADTGF2ZjU4LjI5LjEwMAAAAAAAAAAAAAAA//tQAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWGluZwAAAA8AAAACAAADQgD///////////////////////////////////////////8AAAA8TEFNRTMuMTAwAQAAAAAAAAAAABSAJAJAQgAAgAAAA0L2YLwAAAAAAAAAAAAAAAAAAAAA//sQZAAP8AAAaQAAAAgAAA0gAAABAAABpAAAACAAADSAAAAETEFNRTMuMTAwVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVV//sQZB4P8AAAaQAAAAgAAA0gAAABAAABpAAAACAAADSAAAAEVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVVU=";

/// How one playback attempt ended, from the sink's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    /// Audio played to the end.
    Completed,
    /// `stop()` cut it short.
    Interrupted,
    /// The platform refused to start without a user gesture.
    Blocked,
}

/// Platform audio output. Implementations must release any previously
/// loaded audio before starting new audio (single active playback) and
/// must resolve a concurrent in-flight `play` with `Interrupted` when
/// `stop` is called.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play to completion, interruption, or autoplay refusal.
    async fn play(&self, audio: &AudioRef) -> Result<SinkOutcome, VoiceError>;

    /// Stop the active playback, if any.
    async fn stop(&self);
}

/// User-facing result of a playback request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    /// Autoplay was blocked; the UI should show a manual play control and
    /// call [`PlaybackController::confirm_manual_play`] on tap.
    NeedsUserGesture,
    /// Playback failed. Not fatal to the conversation.
    Failed(String),
}

/// Owns the audio output handle: single active playback, interruption,
/// and the first-gesture autoplay unlock.
pub struct PlaybackController {
    sink: Arc<dyn AudioSink>,
    unlocked: AtomicBool,
}

impl PlaybackController {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            unlocked: AtomicBool::new(false),
        }
    }

    /// Unlock audio output by playing an embedded silent clip. Invoked by
    /// the UI on the very first user tap; idempotent after the first
    /// success.
    pub async fn unlock(&self) -> bool {
        if self.unlocked.load(Ordering::SeqCst) {
            return true;
        }

        // The clip is a compile-time constant; decoding cannot fail.
        let bytes = BASE64.decode(SILENT_CLIP_B64).unwrap_or_default();
        let clip = AudioRef::Bytes {
            bytes,
            mime_type: "audio/mpeg".to_string(),
        };

        match self.sink.play(&clip).await {
            Ok(SinkOutcome::Completed) | Ok(SinkOutcome::Interrupted) => {
                info!("audio output unlocked");
                self.unlocked.store(true, Ordering::SeqCst);
                true
            }
            Ok(SinkOutcome::Blocked) => {
                warn!("could not unlock audio output yet");
                false
            }
            Err(e) => {
                warn!("audio unlock failed: {e}");
                false
            }
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Play synthesized audio. Failures are absorbed into the outcome; a
    /// broken speaker should not abort the conversation.
    pub async fn play(&self, audio: &AudioRef) -> PlaybackOutcome {
        debug!("starting playback");
        match self.sink.play(audio).await {
            Ok(SinkOutcome::Completed) | Ok(SinkOutcome::Interrupted) => {
                PlaybackOutcome::Completed
            }
            Ok(SinkOutcome::Blocked) => {
                warn!("autoplay blocked, falling back to manual play");
                PlaybackOutcome::NeedsUserGesture
            }
            Err(e) => {
                warn!("playback failed: {e}");
                PlaybackOutcome::Failed(e.to_string())
            }
        }
    }

    /// Retry playback after an explicit user gesture (the manual play
    /// control shown for [`PlaybackOutcome::NeedsUserGesture`]). A gesture
    /// also unlocks future autoplay.
    pub async fn confirm_manual_play(&self, audio: &AudioRef) -> PlaybackOutcome {
        self.unlocked.store(true, Ordering::SeqCst);
        self.play(audio).await
    }

    /// Interrupt the active playback.
    pub async fn stop(&self) {
        self.sink.stop().await;
    }
}

/// In-memory sink for tests and the demo binary.
///
/// Completes playback immediately unless built with [`hanging`]
/// (Self::hanging), in which case `play` waits until `stop` is called,
/// mimicking a real player mid-utterance.
pub struct MockAudioSink {
    outcomes: Mutex<VecDeque<Result<SinkOutcome, VoiceError>>>,
    played: Mutex<Vec<AudioRef>>,
    stop_count: AtomicUsize,
    hang: bool,
    interrupt: tokio::sync::Notify,
}

impl MockAudioSink {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            played: Mutex::new(Vec::new()),
            stop_count: AtomicUsize::new(0),
            hang: false,
            interrupt: tokio::sync::Notify::new(),
        }
    }

    /// A sink whose playback only ends when `stop()` is called.
    pub fn hanging() -> Self {
        let mut sink = Self::new();
        sink.hang = true;
        sink
    }

    /// Queue an outcome for the next `play` call (default: `Completed`).
    pub fn push(&self, outcome: Result<SinkOutcome, VoiceError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn played(&self) -> Vec<AudioRef> {
        self.played.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }
}

impl Default for MockAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for MockAudioSink {
    async fn play(&self, audio: &AudioRef) -> Result<SinkOutcome, VoiceError> {
        self.played.lock().unwrap().push(audio.clone());

        if let Some(outcome) = self.outcomes.lock().unwrap().pop_front() {
            return outcome;
        }

        if self.hang {
            self.interrupt.notified().await;
            return Ok(SinkOutcome::Interrupted);
        }

        Ok(SinkOutcome::Completed)
    }

    async fn stop(&self) {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        // notify_one stores a permit, so a stop that lands just before the
        // play future registers still interrupts it.
        self.interrupt.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlock_is_idempotent() {
        let sink = Arc::new(MockAudioSink::new());
        let playback = PlaybackController::new(sink.clone());

        assert!(!playback.is_unlocked());
        assert!(playback.unlock().await);
        assert!(playback.unlock().await);
        assert!(playback.is_unlocked());
        // Only the first unlock touched the sink.
        assert_eq!(sink.played().len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_playback_surfaces_manual_fallback() {
        let sink = Arc::new(MockAudioSink::new());
        sink.push(Ok(SinkOutcome::Blocked));
        let playback = PlaybackController::new(sink.clone());

        let audio = AudioRef::Url("https://cdn.example/a.mp3".into());
        assert_eq!(
            playback.play(&audio).await,
            PlaybackOutcome::NeedsUserGesture
        );

        // The user taps the manual control; playback completes.
        assert_eq!(
            playback.confirm_manual_play(&audio).await,
            PlaybackOutcome::Completed
        );
        assert!(playback.is_unlocked());
    }

    #[tokio::test]
    async fn test_sink_error_becomes_failed_outcome() {
        let sink = Arc::new(MockAudioSink::new());
        sink.push(Err(VoiceError::Playback {
            message: "decoder error".into(),
        }));
        let playback = PlaybackController::new(sink);

        let audio = AudioRef::Url("https://cdn.example/a.mp3".into());
        assert!(matches!(
            playback.play(&audio).await,
            PlaybackOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_stop_interrupts_hanging_playback() {
        let sink = Arc::new(MockAudioSink::hanging());
        let playback = Arc::new(PlaybackController::new(sink.clone()));

        let audio = AudioRef::Url("https://cdn.example/a.mp3".into());
        let player = playback.clone();
        let handle = tokio::spawn(async move { player.play(&audio).await });

        // Let the play future register before interrupting.
        tokio::task::yield_now().await;
        playback.stop().await;

        assert_eq!(handle.await.unwrap(), PlaybackOutcome::Completed);
        assert_eq!(sink.stop_count(), 1);
    }
}

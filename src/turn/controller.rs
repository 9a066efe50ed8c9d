//! The voice turn state machine.
//!
//! One controller instance owns the conversation: it opens capture devices,
//! watches the silence monitor, drives the transcription/chat/synthesis
//! clients in order, and hands audio to the playback controller. All public
//! methods take `&self`; the controller is shared as an `Arc` between the
//! UI bindings and its own capture task.
//!
//! Stale-completion protection is a generation counter: pause, interrupt,
//! and stop bump it, and every phase re-checks it after each await. A
//! completion from a superseded phase is dropped instead of mutating state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use super::history::{ConversationLog, ConversationTurn, Role};
use super::state::{ListeningMode, TurnState};
use crate::audio::{
    AmplitudeSample, AudioDeviceFactory, FinalizedAudio, RecordingSession, Signal, StopOutcome,
    VoiceActivityMonitor,
};
use crate::client::{
    with_retry, AudioRef, ChatClient, RetryBudget, SpeechSynthesisClient, TranscriptionClient,
};
use crate::config::Config;
use crate::error::VoiceError;
use crate::playback::{PlaybackController, PlaybackOutcome};

/// Spoken when the chat endpoint fails mid-turn.
const CHAT_FAILURE_REPLY: &str = "Sorry, I'm having trouble responding right now.";

/// Notifications for a UI layer observing the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    StateChanged(TurnState),
    /// Instantaneous input level (0-100) while listening, for a mic meter.
    InputLevel(f32),
    /// The user's utterance, as transcribed.
    TranscriptReady(String),
    /// The assistant's reply text, before synthesis.
    AssistantReply(String),
    /// A turn phase failed; the message is user-presentable.
    TurnFailed(String),
    /// Autoplay was refused; the UI should offer a manual play control for
    /// this audio and call `PlaybackController::confirm_manual_play`.
    PlaybackBlocked(AudioRef),
}

#[derive(Debug, Default)]
struct Bookkeeping {
    last_transcript: Option<String>,
    empty_count: u32,
    resume_to: Option<TurnState>,
}

/// Orchestrates one voice turn at a time: capture, transcribe, chat,
/// synthesize, play.
pub struct VoiceTurnController {
    config: Config,
    devices: Arc<dyn AudioDeviceFactory>,
    transcription: Arc<dyn TranscriptionClient>,
    chat: Arc<dyn ChatClient>,
    synthesis: Arc<dyn SpeechSynthesisClient>,
    playback: Arc<PlaybackController>,

    state: Mutex<TurnState>,
    generation: AtomicU64,
    capturing: AtomicBool,
    stop_requested: Notify,
    bookkeeping: Mutex<Bookkeeping>,
    history: Mutex<ConversationLog>,
    events: mpsc::UnboundedSender<TurnEvent>,
    handle: Weak<Self>,
}

impl VoiceTurnController {
    pub fn new(
        config: Config,
        devices: Arc<dyn AudioDeviceFactory>,
        transcription: Arc<dyn TranscriptionClient>,
        chat: Arc<dyn ChatClient>,
        synthesis: Arc<dyn SpeechSynthesisClient>,
        playback: Arc<PlaybackController>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TurnEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Arc::new_cyclic(|handle| Self {
            config,
            devices,
            transcription,
            chat,
            synthesis,
            playback,
            state: Mutex::new(TurnState::Idle),
            generation: AtomicU64::new(0),
            capturing: AtomicBool::new(false),
            stop_requested: Notify::new(),
            bookkeeping: Mutex::new(Bookkeeping::default()),
            history: Mutex::new(ConversationLog::new()),
            events,
            handle: handle.clone(),
        });
        (controller, rx)
    }

    pub fn state(&self) -> TurnState {
        *self.state.lock().unwrap()
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.history.lock().unwrap().snapshot()
    }

    pub fn mode(&self) -> ListeningMode {
        self.config.turn.mode
    }

    fn set_state(&self, next: TurnState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            debug!(from = ?*state, to = ?next, "turn state change");
            *state = next;
            let _ = self.events.send(TurnEvent::StateChanged(next));
        }
    }

    fn stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    /// Begin a listening phase: open a capture device and spawn the capture
    /// loop. A no-op while a turn is active or a capture is already running,
    /// so a double tap cannot create a second session.
    pub async fn start_listening(&self) -> Result<(), VoiceError> {
        {
            let state = *self.state.lock().unwrap();
            if !state.can_start_listening() {
                debug!(?state, "ignoring listen request in this state");
                return Ok(());
            }
        }
        if self.capturing.swap(true, Ordering::SeqCst) {
            debug!("already capturing, ignoring listen request");
            return Ok(());
        }

        let device = match self.devices.create() {
            Ok(device) => device,
            Err(e) => {
                self.capturing.store(false, Ordering::SeqCst);
                self.surface_device_error(&e);
                return Err(e);
            }
        };

        let session = match RecordingSession::start(device, self.config.capture.clone()).await {
            Ok(session) => session,
            Err(e) => {
                self.capturing.store(false, Ordering::SeqCst);
                self.surface_device_error(&e);
                return Err(e);
            }
        };

        self.set_state(TurnState::Listening);

        let auto_stop = self.config.turn.mode == ListeningMode::Continuous;
        let vad = VoiceActivityMonitor::new(&self.config.vad, auto_stop);
        let generation = self.generation.load(Ordering::SeqCst);

        if let Some(this) = self.handle.upgrade() {
            tokio::spawn(async move {
                this.run_capture(session, vad, generation).await;
            });
        }
        Ok(())
    }

    /// Boxed to break the start_listening -> run_capture -> re_arm ->
    /// start_listening async type cycle.
    fn start_listening_boxed(
        &self,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<(), VoiceError>> + Send + '_>,
    > {
        Box::pin(self.start_listening())
    }

    fn surface_device_error(&self, e: &VoiceError) {
        warn!("could not start listening: {e}");
        let _ = self.events.send(TurnEvent::TurnFailed(e.to_string()));
        self.set_state(TurnState::Error);
        self.set_state(TurnState::Idle);
    }

    /// End the current listening phase and submit what was recorded. This
    /// is the push-to-talk release and the manual stop control; in
    /// continuous mode the silence monitor calls the same path internally.
    pub fn stop_recording(&self) {
        // notify_one stores a permit, so a release that lands while the
        // capture loop is mid-chunk is not lost. Only signal while a
        // session exists; a stored permit would otherwise cancel the next
        // session the moment it starts.
        if self.capturing.load(Ordering::SeqCst) {
            self.stop_requested.notify_one();
        }
    }

    async fn run_capture(
        &self,
        mut session: RecordingSession,
        mut vad: VoiceActivityMonitor,
        generation: u64,
    ) {
        loop {
            // Biased so already-delivered chunks are drained (and seen by
            // the silence monitor) before a stop request is honored.
            tokio::select! {
                biased;
                chunk = session.next_chunk() => match chunk {
                    Some(chunk) => {
                        let _ = self.events.send(TurnEvent::InputLevel(chunk.level));
                        let sample = AmplitudeSample {
                            timestamp_ms: chunk.timestamp_ms,
                            level: chunk.level,
                        };
                        if vad.observe(sample) == Signal::SilenceThresholdReached {
                            debug!("silence threshold reached, stopping recording");
                            break;
                        }
                    }
                    None => break,
                },
                _ = self.stop_requested.notified() => {
                    debug!("stop requested, ending recording");
                    break;
                }
            }
        }

        let outcome = session.stop().await;
        self.capturing.store(false, Ordering::SeqCst);

        if self.stale(generation) {
            debug!("discarding recording from superseded listening phase");
            return;
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("recording failed to finalize: {e}");
                let _ = self.events.send(TurnEvent::TurnFailed(e.to_string()));
                self.re_arm().await;
                return;
            }
        };

        match outcome {
            StopOutcome::NotRecording => {}
            StopOutcome::EmptyRecording => {
                self.discard_recording("recording below minimum size").await;
            }
            StopOutcome::Finalized(audio) => {
                if !vad.speech_detected() {
                    self.discard_recording("no speech detected").await;
                } else if audio.duration_ms < self.config.capture.min_recording_ms {
                    self.discard_recording("recording too short").await;
                } else {
                    self.run_turn(generation, audio).await;
                }
            }
        }
    }

    /// Drop a recording without any network call.
    async fn discard_recording(&self, reason: &str) {
        info!(reason, "discarding recording");
        self.re_arm().await;
    }

    /// Where a finished (or abandoned) turn lands: continuous mode loops
    /// straight back into listening, push-to-talk waits for the next press.
    async fn re_arm(&self) {
        match self.config.turn.mode {
            ListeningMode::Continuous => {
                self.set_state(TurnState::Listening);
                if let Err(e) = self.start_listening_boxed().await {
                    warn!("could not re-arm listening: {e}");
                }
            }
            ListeningMode::PushToTalk => {
                self.set_state(TurnState::Idle);
            }
        }
    }

    async fn run_turn(&self, generation: u64, audio: FinalizedAudio) {
        self.set_state(TurnState::Transcribing);

        let budget = RetryBudget::new(
            self.config.api.transcribe_attempts,
            self.config.api.retry_base_delay_ms,
        );
        let result = with_retry(budget, "transcribe", || {
            self.transcription.transcribe(&audio)
        })
        .await;

        if self.stale(generation) {
            debug!("dropping transcription result from superseded turn");
            return;
        }

        let text = match result {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("transcription failed: {e}");
                let _ = self.events.send(TurnEvent::TurnFailed(e.to_string()));
                self.re_arm().await;
                return;
            }
        };

        if is_empty_transcript(&text) {
            let exhausted = {
                let mut bk = self.bookkeeping.lock().unwrap();
                bk.empty_count += 1;
                info!(count = bk.empty_count, "empty transcription");
                if bk.empty_count >= self.config.turn.max_empty_transcriptions {
                    bk.empty_count = 0;
                    true
                } else {
                    false
                }
            };
            if exhausted {
                info!("empty transcription budget exhausted, speaking hint");
                let prompt = self.config.turn.fallback_prompt.clone();
                self.speak(generation, &prompt, None).await;
            } else {
                self.re_arm().await;
            }
            return;
        }

        let duplicate = {
            let mut bk = self.bookkeeping.lock().unwrap();
            if bk.last_transcript.as_deref() == Some(text.as_str()) {
                // The same utterance twice in a row is a feedback loop
                // (the microphone hearing the speaker), not the user.
                warn!(%text, "identical transcript twice in a row, dropping turn");
                bk.last_transcript = None;
                true
            } else {
                bk.last_transcript = Some(text.clone());
                bk.empty_count = 0;
                false
            }
        };
        if duplicate {
            let _ = self.events.send(TurnEvent::TurnFailed(
                VoiceError::DuplicateTranscriptLoop.to_string(),
            ));
            self.re_arm().await;
            return;
        }

        let _ = self.events.send(TurnEvent::TranscriptReady(text.clone()));
        self.set_state(TurnState::Chatting);

        let snapshot = self.history.lock().unwrap().snapshot();
        let reply = self.chat.chat(&snapshot, &text).await;

        if self.stale(generation) {
            debug!("dropping chat reply from superseded turn");
            return;
        }

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!("chat request failed: {e}");
                {
                    let mut history = self.history.lock().unwrap();
                    history.append(Role::User, &text);
                    history.append(Role::Assistant, CHAT_FAILURE_REPLY);
                }
                let _ = self.events.send(TurnEvent::TurnFailed(e.to_string()));
                let _ = self
                    .events
                    .send(TurnEvent::AssistantReply(CHAT_FAILURE_REPLY.to_string()));
                self.set_state(TurnState::Idle);
                return;
            }
        };

        {
            let mut history = self.history.lock().unwrap();
            history.append(Role::User, &text);
            history.append(Role::Assistant, &reply.text);
        }
        let _ = self
            .events
            .send(TurnEvent::AssistantReply(reply.text.clone()));

        // A backend that fuses chat and synthesis returns the audio URL
        // with the reply; honor it and skip the synthesis round trip.
        let prefetched = reply.audio_url.map(AudioRef::Url);
        self.speak(generation, &reply.text, prefetched).await;
    }

    async fn speak(&self, generation: u64, text: &str, prefetched: Option<AudioRef>) {
        self.set_state(TurnState::Speaking);

        let audio = match prefetched {
            Some(audio) => audio,
            None => match self.synthesis.synthesize(text).await {
                Ok(audio) => audio,
                Err(e) => {
                    warn!("speech synthesis failed: {e}");
                    let _ = self.events.send(TurnEvent::TurnFailed(e.to_string()));
                    if !self.stale(generation) {
                        self.re_arm().await;
                    }
                    return;
                }
            },
        };

        if self.stale(generation) {
            debug!("dropping synthesized audio from superseded turn");
            return;
        }

        match self.playback.play(&audio).await {
            PlaybackOutcome::Completed => {}
            PlaybackOutcome::NeedsUserGesture => {
                // The turn still counts as complete; the UI takes over with
                // a manual play control.
                let _ = self.events.send(TurnEvent::PlaybackBlocked(audio));
            }
            PlaybackOutcome::Failed(message) => {
                let _ = self
                    .events
                    .send(TurnEvent::TurnFailed(format!("playback failed: {message}")));
            }
        }

        if self.stale(generation) {
            debug!("skipping re-arm for superseded turn");
            return;
        }
        self.re_arm().await;
    }

    /// Barge-in: cut the assistant off mid-utterance and go straight back
    /// to listening (continuous) or idle (push-to-talk). A no-op outside
    /// the Speaking state, so it can be bound to the same tap as
    /// `start_listening`.
    pub async fn interrupt(&self) {
        if self.state() != TurnState::Speaking {
            debug!("interrupt ignored, not speaking");
            return;
        }
        info!("playback interrupted by user");
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.playback.stop().await;
        self.re_arm().await;
    }

    /// Suspend the conversation: cancel any in-flight recording, stop
    /// playback, and drop whatever the current turn was doing. In-flight
    /// network requests are not aborted; their completions are discarded.
    pub async fn pause(&self) {
        let current = self.state();
        if current == TurnState::Paused || current == TurnState::Error {
            return;
        }
        info!("conversation paused");
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_recording();
        self.playback.stop().await;

        let resume_to = if current == TurnState::Idle {
            TurnState::Idle
        } else {
            TurnState::Listening
        };
        self.bookkeeping.lock().unwrap().resume_to = Some(resume_to);
        self.set_state(TurnState::Paused);
    }

    /// Resume a paused conversation where it left off: back to listening if
    /// anything was in progress when paused, otherwise idle.
    pub async fn resume(&self) {
        if self.state() != TurnState::Paused {
            return;
        }
        let target = self
            .bookkeeping
            .lock()
            .unwrap()
            .resume_to
            .take()
            .unwrap_or(TurnState::Idle);
        info!(?target, "conversation resumed");

        match target {
            TurnState::Listening => {
                self.set_state(TurnState::Idle);
                if let Err(e) = self.start_listening().await {
                    warn!("could not resume listening: {e}");
                }
            }
            _ => self.set_state(TurnState::Idle),
        }
    }

    /// Shut the conversation down to Idle: stop recording and playback and
    /// invalidate every in-flight phase. The transcript is kept.
    pub async fn stop_conversation(&self) {
        info!("stopping conversation");
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_recording();
        self.playback.stop().await;
        {
            let mut bk = self.bookkeeping.lock().unwrap();
            bk.last_transcript = None;
            bk.empty_count = 0;
            bk.resume_to = None;
        }
        self.set_state(TurnState::Idle);
    }
}

/// A transcript that carries no usable utterance: blank, the literal
/// "undefined" some transcription backends emit for silence, or a single
/// word (almost always a noise artifact like "you" or "thanks").
fn is_empty_transcript(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("undefined")
        || trimmed.split_whitespace().count() <= 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_transcript_detection() {
        assert!(is_empty_transcript(""));
        assert!(is_empty_transcript("   "));
        assert!(is_empty_transcript("undefined"));
        assert!(is_empty_transcript("you"));
        assert!(!is_empty_transcript("turn on the lights"));
        assert!(!is_empty_transcript("hello there"));
    }
}

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod playback;
pub mod turn;

pub use audio::{
    AudioCaptureDevice, AudioChunk, AudioDeviceFactory, FinalizedAudio, QueuedDeviceFactory,
    RecordingSession, ScriptedDevice, StopOutcome, VoiceActivityMonitor,
};
pub use client::{
    AudioRef, ChatClient, ChatReply, HttpApi, HttpChatClient, HttpSpeechSynthesisClient,
    HttpTranscriptionClient, MockChatClient, MockSpeechSynthesisClient, MockTranscriptionClient,
    SpeechSynthesisClient, TranscriptionClient,
};
pub use config::Config;
pub use error::VoiceError;
pub use playback::{AudioSink, MockAudioSink, PlaybackController, PlaybackOutcome, SinkOutcome};
pub use turn::{
    ConversationTurn, ListeningMode, Role, TurnEvent, TurnState, VoiceTurnController,
};

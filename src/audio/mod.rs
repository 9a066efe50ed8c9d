pub mod capture;
pub mod device;
pub mod vad;

pub use capture::{CaptureSession, CaptureState, FinalizedAudio, RecordingSession, StopOutcome};
pub use device::{
    negotiate_mime_type, AudioCaptureDevice, AudioChunk, AudioDeviceFactory, QueuedDeviceFactory,
    ScriptedDevice,
};
pub use vad::{AmplitudeSample, Signal, VoiceActivityMonitor};

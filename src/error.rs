//! Error types for the Nag voice client core.
//!
//! Uses `thiserror` for the public error surface. Every component failure
//! bubbles to the turn controller as a `VoiceError`; the controller alone
//! decides the resulting state transition and user-visible message.

/// Top-level error type for the voice-turn pipeline.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Microphone permission denied, device busy, or no negotiable encoding.
    #[error("audio device unavailable: {message}")]
    DeviceUnavailable { message: String },

    /// The finalized recording fell below the minimum byte threshold.
    /// Downgraded to a "try again" hint by the controller, never fatal.
    #[error("recording too small to contain speech")]
    EmptyRecording,

    /// Timeout, connect failure, or a 5xx from the backend. Retryable for
    /// transcription only.
    #[error("transport failure talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The backend answered but the body had none of the expected shapes.
    #[error("unexpected response from {endpoint}: {message}")]
    Protocol { endpoint: String, message: String },

    /// Transcription request was rejected (4xx) or exhausted its retries.
    #[error("transcription failed with status {status}: {body}")]
    TranscriptionFailed { status: u16, body: String },

    /// Chat request failed. Never retried; produces one apologetic turn.
    #[error("chat request failed: {message}")]
    ChatFailed { message: String },

    /// Text-to-speech request failed. Never retried.
    #[error("speech synthesis failed: {message}")]
    SynthesisFailed { message: String },

    /// Audio output failed. Not fatal to the conversation; the controller
    /// falls back to a manual-play affordance.
    #[error("playback failed: {message}")]
    Playback { message: String },

    /// Self-detected transcript echo loop. Logged, never surfaced.
    #[error("duplicate transcript loop detected")]
    DuplicateTranscriptLoop,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Whether a retry budget may be spent on this failure.
    ///
    /// Only transport-class failures qualify: timeouts, unreachable hosts,
    /// and 5xx statuses. 4xx and malformed bodies are deterministic and
    /// retrying them would only repeat the same answer.
    pub fn is_transient(&self) -> bool {
        match self {
            VoiceError::Transport { .. } => true,
            VoiceError::TranscriptionFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Classify a reqwest failure against the endpoint it was sent to.
    pub fn from_request(endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return VoiceError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            };
        }
        match err.status() {
            Some(status) if status.is_server_error() => VoiceError::Transport {
                endpoint: endpoint.to_string(),
                message: format!("server error {status}"),
            },
            _ => VoiceError::Protocol {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_transient() {
        let err = VoiceError::Transport {
            endpoint: "/transcribe".into(),
            message: "connection reset".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_server_status_is_transient_client_status_is_not() {
        let five_oh_two = VoiceError::TranscriptionFailed {
            status: 502,
            body: "bad gateway".into(),
        };
        assert!(five_oh_two.is_transient());

        let four_hundred = VoiceError::TranscriptionFailed {
            status: 400,
            body: "unsupported codec".into(),
        };
        assert!(!four_hundred.is_transient());
    }

    #[test]
    fn test_protocol_and_chat_failures_are_not_transient() {
        let protocol = VoiceError::Protocol {
            endpoint: "/transcribe".into(),
            message: "no transcription field".into(),
        };
        assert!(!protocol.is_transient());

        let chat = VoiceError::ChatFailed {
            message: "boom".into(),
        };
        assert!(!chat.is_transient());
    }
}

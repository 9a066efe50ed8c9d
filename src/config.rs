use anyhow::Result;
use serde::Deserialize;

/// Top-level configuration for the Nag voice client.
///
/// Every section has sensible defaults so a config file only needs to name
/// what it overrides. Environment variables prefixed `NAG_` override the
/// file (e.g. `NAG_API__BASE_URL`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub turn: TurnConfig,
}

/// Remote backend endpoints and request policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the chat/transcription/TTS backend.
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Total transcription attempts (initial + retries).
    pub transcribe_attempts: u32,

    /// Base delay for exponential backoff between transcription retries.
    pub retry_base_delay_ms: u64,

    /// Hint sent with uploads so the server can special-case Safari-style
    /// containers.
    pub client_hint: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 12,
            transcribe_attempts: 3,
            retry_base_delay_ms: 1000,
            client_hint: "other".to_string(),
        }
    }
}

/// Recording session limits and encoding preferences.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Encoding preference order used against the device capability list.
    /// First supported entry wins; an empty device list means the device
    /// default is used as-is.
    pub preferred_mime_types: Vec<String>,

    /// Recordings shorter than this never reach the transcription endpoint.
    pub min_recording_ms: u64,

    /// Finalized blobs smaller than this are treated as "no speech".
    pub min_recording_bytes: usize,

    /// Hard cap; the capture loop stops the recording when exceeded.
    pub max_recording_ms: u64,

    /// Delay between the final flush request and finalization, for devices
    /// that batch encoder output.
    pub pre_stop_flush_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            preferred_mime_types: vec![
                "audio/webm".to_string(),
                "audio/mp4".to_string(),
                "audio/mpeg".to_string(),
                "audio/ogg;codecs=opus".to_string(),
                "audio/pcm;rate=16000".to_string(),
            ],
            min_recording_ms: 1000,
            min_recording_bytes: 1000,
            max_recording_ms: 20_000,
            pre_stop_flush_ms: 150,
        }
    }
}

/// Silence detection tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Amplitude level (0-100 scale) below which a sample counts as silence.
    pub silence_threshold: f32,

    /// How long the level must stay below threshold before the monitor
    /// signals a stop.
    pub silence_duration_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 12.0,
            silence_duration_ms: 1500,
        }
    }
}

/// Turn controller policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// `continuous` (silence auto-stops the recording and turns loop) or
    /// `push_to_talk` (explicit release stops it).
    pub mode: crate::turn::ListeningMode,

    /// Consecutive empty transcriptions before the fallback prompt is
    /// spoken instead of silently re-listening.
    pub max_empty_transcriptions: u32,

    /// Spoken when the empty-transcription budget is exhausted.
    pub fallback_prompt: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            mode: crate::turn::ListeningMode::Continuous,
            max_empty_transcriptions: 3,
            fallback_prompt: "I didn't hear enough. Please try speaking a complete sentence."
                .to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file, with `NAG_` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("NAG").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tuning() {
        let cfg = Config::default();
        assert_eq!(cfg.api.transcribe_attempts, 3);
        assert_eq!(cfg.api.retry_base_delay_ms, 1000);
        assert_eq!(cfg.vad.silence_duration_ms, 1500);
        assert_eq!(cfg.capture.min_recording_ms, 1000);
        assert_eq!(cfg.capture.min_recording_bytes, 1000);
        assert!(cfg.capture.preferred_mime_types[0].contains("webm"));
    }

    #[test]
    fn test_file_overrides_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nag-voice.toml");
        std::fs::write(
            &path,
            "[vad]\nsilence_threshold = 20.0\n\n[turn]\nmode = \"push_to_talk\"\n",
        )?;

        let cfg = Config::load(path.with_extension("").to_str().unwrap())?;
        assert_eq!(cfg.vad.silence_threshold, 20.0);
        assert_eq!(cfg.turn.mode, crate::turn::ListeningMode::PushToTalk);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.api.transcribe_attempts, 3);
        Ok(())
    }
}

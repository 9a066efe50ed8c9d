//! Speech synthesis client: trait, HTTP implementation, and mock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::HttpApi;
use crate::error::VoiceError;

/// Playable audio handed to the playback controller: a URL the platform
/// player can stream, or raw bytes when the endpoint returns audio inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioRef {
    Url(String),
    Bytes { bytes: Vec<u8>, mime_type: String },
}

/// Sends assistant text to the text-to-speech endpoint.
#[async_trait]
pub trait SpeechSynthesisClient: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioRef, VoiceError>;

    /// Client name for logging.
    fn name(&self) -> &str;
}

/// HTTP client for `POST {base}/text-to-speech`.
pub struct HttpSpeechSynthesisClient {
    api: HttpApi,
    voice_id: Option<String>,
    model_id: Option<String>,
}

impl HttpSpeechSynthesisClient {
    pub fn new(api: HttpApi) -> Self {
        Self {
            api,
            voice_id: None,
            model_id: None,
        }
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = Some(voice_id.into());
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }
}

#[async_trait]
impl SpeechSynthesisClient for HttpSpeechSynthesisClient {
    async fn synthesize(&self, text: &str) -> Result<AudioRef, VoiceError> {
        let endpoint = "/text-to-speech";
        let url = self.api.endpoint(endpoint);

        let mut body = json!({
            "text": text,
            "request_id": Uuid::new_v4().to_string(),
        });
        if let Some(voice_id) = &self.voice_id {
            body["voice_id"] = json!(voice_id);
        }
        if let Some(model_id) = &self.model_id {
            body["model_id"] = json!(model_id);
        }

        debug!(chars = text.len(), "requesting speech synthesis");

        let response = self
            .api
            .client()
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::from_request(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::SynthesisFailed {
                message: format!("status {status}: {body}"),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        // Some deployments return the audio bytes directly instead of a URL.
        if content_type.starts_with("audio/") {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| VoiceError::SynthesisFailed {
                    message: format!("failed to read audio body: {e}"),
                })?;
            return Ok(AudioRef::Bytes {
                bytes: bytes.to_vec(),
                mime_type: content_type,
            });
        }

        let data: serde_json::Value =
            response.json().await.map_err(|e| VoiceError::Protocol {
                endpoint: endpoint.to_string(),
                message: format!("JSON parse failed: {e}"),
            })?;

        data.get("audio_url")
            .and_then(|v| v.as_str())
            .map(|s| AudioRef::Url(s.to_string()))
            .ok_or_else(|| VoiceError::Protocol {
                endpoint: endpoint.to_string(),
                message: format!("no audio_url in {data}"),
            })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Mock synthesis client with queued outcomes.
pub struct MockSpeechSynthesisClient {
    responses: Mutex<VecDeque<Result<AudioRef, VoiceError>>>,
    call_count: AtomicUsize,
}

impl MockSpeechSynthesisClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// A mock that always returns the same URL, for happy-path tests.
    pub fn always(url: &str) -> Self {
        let mock = Self::new();
        for _ in 0..64 {
            mock.push(Ok(AudioRef::Url(url.to_string())));
        }
        mock
    }

    pub fn push(&self, outcome: Result<AudioRef, VoiceError>) {
        self.responses.lock().unwrap().push_back(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockSpeechSynthesisClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesisClient for MockSpeechSynthesisClient {
    async fn synthesize(&self, _text: &str) -> Result<AudioRef, VoiceError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(VoiceError::SynthesisFailed {
                    message: "no mock responses queued".to_string(),
                })
            })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_synthesis_queue() {
        let mock = MockSpeechSynthesisClient::new();
        mock.push(Ok(AudioRef::Url("https://cdn.example/a.mp3".into())));

        let first = mock.synthesize("hello").await.unwrap();
        assert_eq!(first, AudioRef::Url("https://cdn.example/a.mp3".into()));

        let second = mock.synthesize("hello again").await;
        assert!(matches!(second, Err(VoiceError::SynthesisFailed { .. })));
        assert_eq!(mock.call_count(), 2);
    }
}

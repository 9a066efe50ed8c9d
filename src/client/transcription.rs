//! Transcription client: trait, HTTP implementation, and mock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::HttpApi;
use crate::audio::FinalizedAudio;
use crate::error::VoiceError;

/// Field names the backend has been observed to put transcribed text in,
/// tried in order. The service is third-party and loosely specified; the
/// tolerance is deliberate, but explicit.
const TEXT_FIELDS: [&str; 5] = ["transcription", "transcript", "text", "result", "message"];

/// Sends finalized audio to the remote transcription endpoint.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    /// Transcribe one finalized recording. The returned text is untrimmed;
    /// the turn controller owns the empty/short classification.
    async fn transcribe(&self, audio: &FinalizedAudio) -> Result<String, VoiceError>;

    /// Client name for logging.
    fn name(&self) -> &str;
}

/// Pull transcribed text out of any of the backend's known response
/// shapes: a flat object with one of [`TEXT_FIELDS`], a bare string, or an
/// array whose first element is such an object.
pub fn extract_transcript_text(value: &serde_json::Value) -> Option<String> {
    if let Some(s) = value.as_str() {
        return Some(s.to_string());
    }
    if let Some(obj) = value.as_object() {
        for field in TEXT_FIELDS {
            if let Some(text) = obj.get(field).and_then(|v| v.as_str()) {
                return Some(text.to_string());
            }
        }
        return None;
    }
    value
        .as_array()
        .and_then(|items| items.first())
        .and_then(extract_transcript_text)
}

/// HTTP client for `POST {base}/transcribe` (multipart upload).
pub struct HttpTranscriptionClient {
    api: HttpApi,
}

impl HttpTranscriptionClient {
    pub fn new(api: HttpApi) -> Self {
        Self { api }
    }

    fn file_name(mime_type: &str) -> &'static str {
        if mime_type.contains("webm") {
            "input.webm"
        } else if mime_type.contains("mp4") || mime_type.contains("mpeg") {
            "input.mp3"
        } else if mime_type.contains("ogg") {
            "input.ogg"
        } else if mime_type.contains("wav") {
            "input.wav"
        } else {
            "input.audio"
        }
    }
}

#[async_trait]
impl TranscriptionClient for HttpTranscriptionClient {
    async fn transcribe(&self, audio: &FinalizedAudio) -> Result<String, VoiceError> {
        let endpoint = "/transcribe";
        let url = self.api.endpoint(endpoint);

        let mut part = reqwest::multipart::Part::bytes(audio.bytes.clone())
            .file_name(Self::file_name(&audio.mime_type));
        if !audio.mime_type.is_empty() {
            part = part
                .mime_str(&audio.mime_type)
                .map_err(|e| VoiceError::Protocol {
                    endpoint: endpoint.to_string(),
                    message: format!("invalid MIME type: {e}"),
                })?;
        }

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("mime_type", audio.mime_type.clone())
            .text("browser", self.api.client_hint().to_string());

        debug!(bytes = audio.bytes.len(), mime_type = %audio.mime_type, "uploading voice");

        let response = self
            .api
            .client()
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::from_request(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::TranscriptionFailed {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value =
            response.json().await.map_err(|e| VoiceError::Protocol {
                endpoint: endpoint.to_string(),
                message: format!("JSON parse failed: {e}"),
            })?;

        extract_transcript_text(&json).ok_or_else(|| VoiceError::Protocol {
            endpoint: endpoint.to_string(),
            message: format!("no transcription field in response: {json}"),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// A mock transcription client with queued outcomes, for tests and the
/// demo binary.
pub struct MockTranscriptionClient {
    responses: Mutex<VecDeque<Result<String, VoiceError>>>,
    call_count: AtomicUsize,
}

impl MockTranscriptionClient {
    /// Create a mock that fails (nothing queued).
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Queue successful transcriptions.
    pub fn with_texts(texts: &[&str]) -> Self {
        let mock = Self::new();
        {
            let mut queue = mock.responses.lock().unwrap();
            for text in texts {
                queue.push_back(Ok(text.to_string()));
            }
        }
        mock
    }

    /// Queue an outcome (success or failure).
    pub fn push(&self, outcome: Result<String, VoiceError>) {
        self.responses.lock().unwrap().push_back(outcome);
    }

    /// Number of times `transcribe` was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockTranscriptionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptionClient for MockTranscriptionClient {
    async fn transcribe(&self, _audio: &FinalizedAudio) -> Result<String, VoiceError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(VoiceError::Transport {
                    endpoint: "/transcribe".to_string(),
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
    use serde_json::json;

    #[test]
    fn test_adapter_tries_fields_in_order() {
        let shapes = [
            json!({"transcription": "from transcription"}),
            json!({"transcript": "from transcript"}),
            json!({"text": "from text"}),
            json!({"result": "from result"}),
            json!({"message": "from message"}),
        ];
        let expected = [
            "from transcription",
            "from transcript",
            "from text",
            "from result",
            "from message",
        ];
        for (shape, want) in shapes.iter().zip(expected) {
            assert_eq!(extract_transcript_text(shape).as_deref(), Some(want));
        }

        // "transcription" wins over later candidates.
        let both = json!({"text": "later", "transcription": "first"});
        assert_eq!(extract_transcript_text(&both).as_deref(), Some("first"));
    }

    #[test]
    fn test_adapter_accepts_array_and_bare_string() {
        let array = json!([{"text": "what time is it"}]);
        assert_eq!(
            extract_transcript_text(&array).as_deref(),
            Some("what time is it")
        );

        let bare = json!("plain answer");
        assert_eq!(extract_transcript_text(&bare).as_deref(), Some("plain answer"));
    }

    #[test]
    fn test_adapter_rejects_unknown_shapes() {
        assert_eq!(extract_transcript_text(&json!({"status": "ok"})), None);
        assert_eq!(extract_transcript_text(&json!([])), None);
        assert_eq!(extract_transcript_text(&json!(42)), None);
    }

    #[test]
    fn test_upload_file_name_follows_container() {
        assert_eq!(HttpTranscriptionClient::file_name("audio/webm"), "input.webm");
        assert_eq!(HttpTranscriptionClient::file_name("audio/mp4"), "input.mp3");
        assert_eq!(
            HttpTranscriptionClient::file_name("audio/ogg;codecs=opus"),
            "input.ogg"
        );
        assert_eq!(HttpTranscriptionClient::file_name("audio/wav"), "input.wav");
        assert_eq!(HttpTranscriptionClient::file_name(""), "input.audio");
    }
}

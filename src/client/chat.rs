//! Chat client: trait, HTTP implementation, and mock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::HttpApi;
use crate::error::VoiceError;
use crate::turn::ConversationTurn;

/// The assistant's reply. When the backend fuses chat and TTS it returns
/// the synthesized audio URL alongside the text; the controller then skips
/// the synthesis call.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub audio_url: Option<String>,
}

/// Sends a user message (with history available) to the chat endpoint.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, history: &[ConversationTurn], message: &str)
        -> Result<ChatReply, VoiceError>;

    /// Client name for logging.
    fn name(&self) -> &str;
}

/// HTTP client for `POST {base}/chat`.
///
/// The backend tracks conversation state server-side, so the wire format
/// carries only the newest message plus a request id for idempotency.
pub struct HttpChatClient {
    api: HttpApi,
}

impl HttpChatClient {
    pub fn new(api: HttpApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn chat(
        &self,
        _history: &[ConversationTurn],
        message: &str,
    ) -> Result<ChatReply, VoiceError> {
        let endpoint = "/chat";
        let url = self.api.endpoint(endpoint);

        let body = json!({
            "message": message,
            "request_id": Uuid::new_v4().to_string(),
        });

        debug!(chars = message.len(), "sending message to chat endpoint");

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
            return Err(VoiceError::ChatFailed {
                message: format!("status {status}: {body}"),
            });
        }

        let data: serde_json::Value =
            response.json().await.map_err(|e| VoiceError::Protocol {
                endpoint: endpoint.to_string(),
                message: format!("JSON parse failed: {e}"),
            })?;

        let audio_url = data
            .get("audio_url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let text = data
            .get("response")
            .or_else(|| data.get("message"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        match (text, audio_url) {
            (Some(text), audio_url) => Ok(ChatReply { text, audio_url }),
            (None, Some(audio_url)) => Ok(ChatReply {
                text: String::new(),
                audio_url: Some(audio_url),
            }),
            (None, None) => Err(VoiceError::Protocol {
                endpoint: endpoint.to_string(),
                message: format!("no response content in {data}"),
            }),
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Mock chat client with queued replies. Records the messages it received.
pub struct MockChatClient {
    replies: Mutex<VecDeque<Result<ChatReply, VoiceError>>>,
    received: Mutex<Vec<String>>,
    call_count: AtomicUsize,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            received: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_replies(texts: &[&str]) -> Self {
        let mock = Self::new();
        {
            let mut queue = mock.replies.lock().unwrap();
            for text in texts {
                queue.push_back(Ok(ChatReply {
                    text: text.to_string(),
                    audio_url: None,
                }));
            }
        }
        mock
    }

    pub fn push(&self, outcome: Result<ChatReply, VoiceError>) {
        self.replies.lock().unwrap().push_back(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Messages received so far, in order.
    pub fn received_messages(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

impl Default for MockChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn chat(
        &self,
        _history: &[ConversationTurn],
        message: &str,
    ) -> Result<ChatReply, VoiceError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.received.lock().unwrap().push(message.to_string());
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(VoiceError::ChatFailed {
                message: "no mock replies queued".to_string(),
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
    async fn test_mock_chat_records_messages() {
        let mock = MockChatClient::with_replies(&["It's 3 PM."]);
        let reply = mock.chat(&[], "what time is it").await.unwrap();
        assert_eq!(reply.text, "It's 3 PM.");
        assert_eq!(mock.received_messages(), vec!["what time is it"]);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_chat_empty_queue_fails() {
        let mock = MockChatClient::new();
        let result = mock.chat(&[], "hello").await;
        assert!(matches!(result, Err(VoiceError::ChatFailed { .. })));
    }
}

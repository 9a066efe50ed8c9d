//! Clients for the remote Nag backend.
//!
//! Each endpoint gets a trait (so the turn controller is testable without
//! a network) plus an HTTP implementation and a mock. All HTTP clients
//! share [`HttpApi`]: base URL, bounded request timeout, upload hints.

pub mod chat;
pub mod retry;
pub mod speech;
pub mod transcription;

pub use chat::{ChatClient, ChatReply, HttpChatClient, MockChatClient};
pub use retry::{with_retry, RetryBudget};
pub use speech::{
    AudioRef, HttpSpeechSynthesisClient, MockSpeechSynthesisClient, SpeechSynthesisClient,
};
pub use transcription::{
    extract_transcript_text, HttpTranscriptionClient, MockTranscriptionClient, TranscriptionClient,
};

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::error::VoiceError;

/// Shared HTTP plumbing for the backend clients.
#[derive(Debug, Clone)]
pub struct HttpApi {
    base_url: String,
    client_hint: String,
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new(config: &ApiConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VoiceError::Transport {
                endpoint: config.base_url.clone(),
                message: format!("HTTP client construction failed: {e}"),
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_hint: config.client_hint.clone(),
            client,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn client_hint(&self) -> &str {
        &self.client_hint
    }

    /// Startup connectivity probe: `GET {base}/health`, up to `attempts`
    /// tries one second apart. Gates enabling the record control.
    pub async fn wait_for_backend(&self, attempts: u32) -> Result<serde_json::Value, VoiceError> {
        let url = self.endpoint("/health");
        let mut last_message = String::new();

        for attempt in 1..=attempts {
            info!(attempt, attempts, "checking backend connection");
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let status = response.json().await.unwrap_or(serde_json::Value::Null);
                    info!("backend reachable");
                    return Ok(status);
                }
                Ok(response) => {
                    last_message = format!("health returned {}", response.status());
                    warn!(%last_message, "health check failed");
                }
                Err(e) => {
                    last_message = e.to_string();
                    warn!(%last_message, "health check failed");
                }
            }
            if attempt < attempts {
                sleep(Duration::from_secs(1)).await;
            }
        }

        Err(VoiceError::Transport {
            endpoint: "/health".to_string(),
            message: last_message,
        })
    }
}

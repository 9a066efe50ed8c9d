use std::io::Cursor;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::device::{negotiate_mime_type, AudioCaptureDevice, AudioChunk};
use crate::config::CaptureConfig;
use crate::error::VoiceError;

/// Lifecycle of one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    Stopped,
}

/// Bookkeeping for one recording: accumulated chunks and their totals.
#[derive(Debug)]
pub struct CaptureSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mime_type: String,
    pub total_bytes: usize,
    pub state: CaptureState,
    chunks: Vec<Vec<u8>>,
    last_timestamp_ms: u64,
}

/// A finished recording, ready for the transcription endpoint.
#[derive(Debug, Clone)]
pub struct FinalizedAudio {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub duration_ms: u64,
}

/// Result of stopping a recording session.
#[derive(Debug)]
pub enum StopOutcome {
    Finalized(FinalizedAudio),
    /// Accumulated bytes fell below the minimum; treat as "no speech".
    EmptyRecording,
    /// Stop was called while not recording; idempotent no-op.
    NotRecording,
}

/// Owns one recording lifecycle: a capture device, its chunk channel, and
/// the accumulating session. Chunks are pulled via [`next_chunk`]
/// (Self::next_chunk) by the caller's capture loop; [`stop`](Self::stop)
/// flushes the device, drains what remains, and finalizes to a single blob.
pub struct RecordingSession {
    config: CaptureConfig,
    device: Box<dyn AudioCaptureDevice>,
    rx: mpsc::Receiver<AudioChunk>,
    session: CaptureSession,
}

impl RecordingSession {
    /// Open the device and begin capturing.
    ///
    /// Negotiates the encoding from the device capability list against the
    /// configured preference order; fails with `DeviceUnavailable` if the
    /// microphone cannot be opened.
    pub async fn start(
        mut device: Box<dyn AudioCaptureDevice>,
        config: CaptureConfig,
    ) -> Result<Self, VoiceError> {
        let mime_type =
            negotiate_mime_type(&config.preferred_mime_types, &device.supported_mime_types());
        if mime_type.is_empty() {
            debug!(device = device.name(), "using device default encoding");
        } else {
            debug!(device = device.name(), mime_type, "negotiated encoding");
        }

        let rx = device.start(&mime_type).await?;

        let session = CaptureSession {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            mime_type,
            total_bytes: 0,
            state: CaptureState::Recording,
            chunks: Vec::new(),
            last_timestamp_ms: 0,
        };
        info!(session_id = %session.id, "recording started");

        Ok(Self {
            config,
            device,
            rx,
            session,
        })
    }

    /// Receive and accumulate the next chunk. Returns `None` when the
    /// device closes the channel or the max recording duration is hit.
    pub async fn next_chunk(&mut self) -> Option<AudioChunk> {
        if self.session.state != CaptureState::Recording {
            return None;
        }
        let chunk = self.rx.recv().await?;
        if chunk.timestamp_ms >= self.config.max_recording_ms {
            debug!("maximum recording duration reached");
            return None;
        }
        self.append(&chunk);
        Some(chunk)
    }

    fn append(&mut self, chunk: &AudioChunk) {
        self.session.total_bytes += chunk.bytes.len();
        self.session.last_timestamp_ms = self.session.last_timestamp_ms.max(chunk.timestamp_ms);
        self.session.chunks.push(chunk.bytes.clone());
    }

    /// Milliseconds of audio accumulated so far, from chunk timestamps.
    pub fn duration_ms(&self) -> u64 {
        self.session.last_timestamp_ms
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    pub fn is_recording(&self) -> bool {
        self.session.state == CaptureState::Recording
    }

    /// Stop capturing and finalize the accumulated chunks into one blob.
    ///
    /// Requests a final flush from the device and waits the configured
    /// pre-stop delay before draining, so batched encoder output is not
    /// lost. Idempotent: a second call returns `NotRecording`.
    pub async fn stop(&mut self) -> Result<StopOutcome, VoiceError> {
        if self.session.state != CaptureState::Recording {
            return Ok(StopOutcome::NotRecording);
        }

        self.device.request_flush().await?;
        if self.config.pre_stop_flush_ms > 0 {
            sleep(Duration::from_millis(self.config.pre_stop_flush_ms)).await;
        }
        self.device.stop().await?;

        // The device has closed the channel; drain whatever is left. The
        // max-duration cap still applies to drained stragglers.
        while let Some(chunk) = self.rx.recv().await {
            if chunk.timestamp_ms < self.config.max_recording_ms {
                self.append(&chunk);
            }
        }
        self.session.state = CaptureState::Stopped;

        if self.session.total_bytes < self.config.min_recording_bytes {
            info!(
                session_id = %self.session.id,
                total_bytes = self.session.total_bytes,
                "recording below minimum size, treating as no speech"
            );
            return Ok(StopOutcome::EmptyRecording);
        }

        let finalized = self.finalize()?;
        info!(
            session_id = %self.session.id,
            bytes = finalized.bytes.len(),
            duration_ms = finalized.duration_ms,
            mime_type = %finalized.mime_type,
            "recording finalized"
        );
        Ok(StopOutcome::Finalized(finalized))
    }

    fn finalize(&mut self) -> Result<FinalizedAudio, VoiceError> {
        let chunks = std::mem::take(&mut self.session.chunks);
        let raw: Vec<u8> = chunks.into_iter().flatten().collect();

        // Raw PCM gets wrapped in a WAV container so the transcription
        // service can read it; pre-encoded containers are sent as-is.
        let (bytes, mime_type) = if self.session.mime_type.starts_with("audio/pcm") {
            (
                encode_wav(&raw, pcm_rate(&self.session.mime_type))?,
                "audio/wav".to_string(),
            )
        } else {
            (raw, self.session.mime_type.clone())
        };

        Ok(FinalizedAudio {
            bytes,
            mime_type,
            duration_ms: self.session.last_timestamp_ms,
        })
    }
}

fn pcm_rate(mime_type: &str) -> u32 {
    mime_type
        .split("rate=")
        .nth(1)
        .and_then(|r| r.split(&[';', ' ']).next())
        .and_then(|r| r.parse().ok())
        .unwrap_or(16_000)
}

/// Wrap little-endian 16-bit mono PCM in a WAV container.
fn encode_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, VoiceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut buf, spec).map_err(|e| {
            warn!("WAV writer creation failed: {e}");
            VoiceError::DeviceUnavailable {
                message: format!("WAV encoding failed: {e}"),
            }
        })?;
        for sample in pcm.chunks_exact(2) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            writer
                .write_sample(value)
                .map_err(|e| VoiceError::DeviceUnavailable {
                    message: format!("WAV encoding failed: {e}"),
                })?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::DeviceUnavailable {
                message: format!("WAV encoding failed: {e}"),
            })?;
    }
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_rate_parsing() {
        assert_eq!(pcm_rate("audio/pcm;rate=16000"), 16_000);
        assert_eq!(pcm_rate("audio/pcm;rate=44100"), 44_100);
        assert_eq!(pcm_rate("audio/pcm"), 16_000);
    }

    #[test]
    fn test_encode_wav_header() {
        let pcm: Vec<u8> = vec![0, 0, 100, 0, 156, 255, 0, 1];
        let wav = encode_wav(&pcm, 16_000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }
}

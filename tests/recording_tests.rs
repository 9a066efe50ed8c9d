// Integration tests for the recording session lifecycle.
//
// These drive a scripted capture device through the start / chunk /
// stop / finalize flow and verify the size, duration, and encoding gates.

use anyhow::Result;
use nag_voice::audio::{AudioChunk, RecordingSession, ScriptedDevice, StopOutcome};
use nag_voice::config::CaptureConfig;

fn fast_config() -> CaptureConfig {
    CaptureConfig {
        pre_stop_flush_ms: 0,
        ..CaptureConfig::default()
    }
}

#[tokio::test]
async fn test_recording_finalizes_and_stop_is_idempotent() -> Result<()> {
    let script = ScriptedDevice::uniform_script(12, 200, 50.0);
    let device = ScriptedDevice::new(vec!["audio/webm".to_string()], script);

    let mut session = RecordingSession::start(Box::new(device), fast_config()).await?;
    assert!(session.is_recording());

    for _ in 0..12 {
        assert!(session.next_chunk().await.is_some());
    }
    assert_eq!(session.duration_ms(), 1100);

    let outcome = session.stop().await?;
    let audio = match outcome {
        StopOutcome::Finalized(audio) => audio,
        other => panic!("expected finalized audio, got {other:?}"),
    };
    assert_eq!(audio.bytes.len(), 12 * 200);
    assert_eq!(audio.mime_type, "audio/webm");
    assert_eq!(audio.duration_ms, 1100);
    assert!(!session.is_recording());

    // A second stop is a no-op.
    assert!(matches!(session.stop().await?, StopOutcome::NotRecording));
    Ok(())
}

#[tokio::test]
async fn test_tiny_recording_is_treated_as_no_speech() -> Result<()> {
    // 3 chunks of 100 bytes: well under the 1000-byte minimum.
    let script = ScriptedDevice::uniform_script(3, 100, 50.0);
    let device = ScriptedDevice::new(vec!["audio/webm".to_string()], script);

    let mut session = RecordingSession::start(Box::new(device), fast_config()).await?;
    while session.next_chunk().await.is_some() {
        if session.duration_ms() >= 200 {
            break;
        }
    }

    assert!(matches!(session.stop().await?, StopOutcome::EmptyRecording));
    Ok(())
}

#[tokio::test]
async fn test_flushed_chunks_are_included_in_the_finalized_blob() -> Result<()> {
    let script = ScriptedDevice::uniform_script(10, 200, 50.0);
    let device = ScriptedDevice::new(vec!["audio/webm".to_string()], script).with_held_back(vec![
        AudioChunk {
            bytes: vec![7u8; 500],
            level: 30.0,
            timestamp_ms: 1000,
        },
    ]);

    let mut session = RecordingSession::start(Box::new(device), fast_config()).await?;
    for _ in 0..10 {
        assert!(session.next_chunk().await.is_some());
    }

    // stop() requests a flush before finalizing; the held-back chunk must
    // land in the blob.
    let outcome = session.stop().await?;
    match outcome {
        StopOutcome::Finalized(audio) => {
            assert_eq!(audio.bytes.len(), 10 * 200 + 500);
            assert_eq!(audio.duration_ms, 1000);
        }
        other => panic!("expected finalized audio, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_max_duration_caps_the_recording() -> Result<()> {
    let config = CaptureConfig {
        max_recording_ms: 2000,
        pre_stop_flush_ms: 0,
        ..CaptureConfig::default()
    };

    // 40 chunks spanning 4 seconds, twice the configured cap.
    let script = ScriptedDevice::uniform_script(40, 100, 50.0);
    let device = ScriptedDevice::new(vec!["audio/webm".to_string()], script);

    let mut session = RecordingSession::start(Box::new(device), config).await?;
    let mut received = 0;
    while session.next_chunk().await.is_some() {
        received += 1;
    }

    // Chunks at and past the cap are refused.
    assert_eq!(received, 20);
    assert!(session.duration_ms() < 2000);

    let outcome = session.stop().await?;
    match outcome {
        StopOutcome::Finalized(audio) => {
            assert_eq!(audio.bytes.len(), 20 * 100);
            assert!(audio.duration_ms < 2000);
        }
        other => panic!("expected finalized audio, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_raw_pcm_is_finalized_as_wav() -> Result<()> {
    // A device that only produces raw PCM; negotiation lands on it and
    // finalization wraps the samples in a WAV container.
    let script: Vec<AudioChunk> = (0..12u64)
        .map(|i| AudioChunk {
            bytes: vec![0u8; 320],
            level: 50.0,
            timestamp_ms: i * 100,
        })
        .collect();
    let device = ScriptedDevice::new(vec!["audio/pcm;rate=16000".to_string()], script);

    let mut session = RecordingSession::start(Box::new(device), fast_config()).await?;
    for _ in 0..12 {
        assert!(session.next_chunk().await.is_some());
    }

    let outcome = session.stop().await?;
    match outcome {
        StopOutcome::Finalized(audio) => {
            assert_eq!(audio.mime_type, "audio/wav");
            assert_eq!(&audio.bytes[0..4], b"RIFF");
            assert_eq!(&audio.bytes[8..12], b"WAVE");
        }
        other => panic!("expected finalized audio, got {other:?}"),
    }
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use nag_voice::{
    AudioChunk, Config, HttpApi, ListeningMode, MockAudioSink, MockChatClient,
    MockSpeechSynthesisClient, MockTranscriptionClient, PlaybackController, QueuedDeviceFactory,
    ScriptedDevice, TurnEvent, TurnState, VoiceTurnController,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "nag-voice", about = "Nag voice client demo")]
struct Args {
    /// Config file path, without extension.
    #[arg(long, default_value = "config/nag-voice")]
    config: String,

    /// Probe the backend health endpoint before running the demo turn.
    #[arg(long)]
    check_backend: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;

    info!("Nag voice client v{}", env!("CARGO_PKG_VERSION"));
    info!(base_url = %cfg.api.base_url, mode = ?cfg.turn.mode, "loaded config");

    if args.check_backend {
        let api = HttpApi::new(&cfg.api)?;
        match api.wait_for_backend(3).await {
            Ok(status) => info!(%status, "backend is healthy"),
            Err(e) => {
                warn!("backend unreachable, not starting: {e}");
                return Ok(());
            }
        }
    }

    // Walk one full turn through the state machine with a scripted
    // microphone, canned backend replies, and an in-memory speaker. The
    // release gesture works the same in both modes, so the demo always
    // runs push-to-talk.
    cfg.turn.mode = ListeningMode::PushToTalk;

    let devices = Arc::new(QueuedDeviceFactory::new());
    devices.push(Box::new(ScriptedDevice::new(
        vec!["audio/webm".to_string()],
        demo_utterance(),
    )));

    let transcription = Arc::new(MockTranscriptionClient::with_texts(&[
        "what's the weather like today",
    ]));
    let chat = Arc::new(MockChatClient::with_replies(&[
        "It's sunny and 22 degrees outside.",
    ]));
    let synthesis = Arc::new(MockSpeechSynthesisClient::always(
        "https://cdn.example/reply.mp3",
    ));
    let sink = Arc::new(MockAudioSink::new());
    let playback = Arc::new(PlaybackController::new(sink));
    playback.unlock().await;

    let (controller, mut events) = VoiceTurnController::new(
        cfg,
        devices,
        transcription,
        chat,
        synthesis,
        playback,
    );

    info!("press... (starting listening)");
    controller.start_listening().await?;

    // Give the capture loop time to consume the script, then release.
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("release... (stopping recording)");
    controller.stop_recording();

    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(5), events.recv()).await
    {
        match event {
            TurnEvent::StateChanged(state) => {
                info!(?state, "state");
                if state == TurnState::Idle {
                    break;
                }
            }
            TurnEvent::InputLevel(_) => {}
            TurnEvent::TranscriptReady(text) => info!(%text, "you said"),
            TurnEvent::AssistantReply(text) => info!(%text, "assistant"),
            TurnEvent::TurnFailed(message) => warn!(%message, "turn failed"),
            TurnEvent::PlaybackBlocked(_) => warn!("playback blocked, manual play needed"),
        }
    }

    for turn in controller.history() {
        info!(role = ?turn.role, text = %turn.text, "transcript");
    }

    Ok(())
}

/// Two seconds of speech-level chunks: enough bytes and duration to clear
/// the minimum-recording gates.
fn demo_utterance() -> Vec<AudioChunk> {
    (0..20)
        .map(|i| AudioChunk {
            bytes: vec![0u8; 200],
            level: 60.0,
            timestamp_ms: i * 100,
        })
        .collect()
}

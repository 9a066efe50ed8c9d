//! Silence detection over amplitude samples.

use crate::config::VadConfig;

/// An instantaneous input-level reading, 0-100 scale.
#[derive(Debug, Clone, Copy)]
pub struct AmplitudeSample {
    pub timestamp_ms: u64,
    pub level: f32,
}

/// Outcome of feeding one sample to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Keep recording.
    Continue,
    /// The level stayed below threshold for the configured duration;
    /// the recording should stop.
    SilenceThresholdReached,
}

/// Decides when a continuous-mode recording should stop.
///
/// Tracks a rolling silence-start timestamp: a sample below the threshold
/// starts the window, a sample above it clears it. When the window reaches
/// `silence_duration_ms` the monitor signals once and then stays inert
/// until [`reset`](Self::reset). In push-to-talk mode (`auto_stop` false)
/// it only tracks the speech-detected latch for the UI meter and never
/// signals.
pub struct VoiceActivityMonitor {
    threshold: f32,
    silence_duration_ms: u64,
    auto_stop: bool,
    silence_start_ms: Option<u64>,
    speech_detected: bool,
    fired: bool,
}

impl VoiceActivityMonitor {
    pub fn new(config: &VadConfig, auto_stop: bool) -> Self {
        Self {
            threshold: config.silence_threshold,
            silence_duration_ms: config.silence_duration_ms,
            auto_stop,
            silence_start_ms: None,
            speech_detected: false,
            fired: false,
        }
    }

    /// Feed one amplitude sample.
    pub fn observe(&mut self, sample: AmplitudeSample) -> Signal {
        if sample.level >= self.threshold {
            self.speech_detected = true;
            self.silence_start_ms = None;
            return Signal::Continue;
        }

        if !self.auto_stop || self.fired {
            return Signal::Continue;
        }

        let start = *self.silence_start_ms.get_or_insert(sample.timestamp_ms);
        if sample.timestamp_ms.saturating_sub(start) >= self.silence_duration_ms {
            self.fired = true;
            return Signal::SilenceThresholdReached;
        }

        Signal::Continue
    }

    /// Whether any sample has crossed the speech threshold this session.
    /// A recording that stopped without this latch set carried no speech
    /// and should be discarded rather than transcribed.
    pub fn speech_detected(&self) -> bool {
        self.speech_detected
    }

    /// Re-arm for the next recording session.
    pub fn reset(&mut self) {
        self.silence_start_ms = None;
        self.speech_detected = false;
        self.fired = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(auto_stop: bool) -> VoiceActivityMonitor {
        VoiceActivityMonitor::new(
            &VadConfig {
                silence_threshold: 12.0,
                silence_duration_ms: 1500,
            },
            auto_stop,
        )
    }

    fn sample(timestamp_ms: u64, level: f32) -> AmplitudeSample {
        AmplitudeSample {
            timestamp_ms,
            level,
        }
    }

    #[test]
    fn test_fires_after_sustained_silence() {
        let mut vad = monitor(true);
        assert_eq!(vad.observe(sample(0, 60.0)), Signal::Continue);
        assert_eq!(vad.observe(sample(500, 5.0)), Signal::Continue);
        assert_eq!(vad.observe(sample(1900, 5.0)), Signal::Continue);
        assert_eq!(
            vad.observe(sample(2000, 5.0)),
            Signal::SilenceThresholdReached
        );
        assert!(vad.speech_detected());
    }

    #[test]
    fn test_speech_clears_silence_window() {
        let mut vad = monitor(true);
        vad.observe(sample(0, 5.0));
        vad.observe(sample(1000, 5.0));
        // Voice comes back before the window elapses.
        vad.observe(sample(1400, 40.0));
        // Window restarts from here.
        assert_eq!(vad.observe(sample(1500, 5.0)), Signal::Continue);
        assert_eq!(vad.observe(sample(2900, 5.0)), Signal::Continue);
        assert_eq!(
            vad.observe(sample(3000, 5.0)),
            Signal::SilenceThresholdReached
        );
    }

    #[test]
    fn test_fires_only_once_until_reset() {
        let mut vad = monitor(true);
        vad.observe(sample(0, 5.0));
        assert_eq!(
            vad.observe(sample(1500, 5.0)),
            Signal::SilenceThresholdReached
        );
        // Same silence interval keeps going; the monitor stays inert.
        assert_eq!(vad.observe(sample(3000, 5.0)), Signal::Continue);
        assert_eq!(vad.observe(sample(5000, 5.0)), Signal::Continue);

        vad.reset();
        assert!(!vad.speech_detected());
        vad.observe(sample(6000, 5.0));
        assert_eq!(
            vad.observe(sample(7500, 5.0)),
            Signal::SilenceThresholdReached
        );
    }

    #[test]
    fn test_push_to_talk_never_auto_stops() {
        let mut vad = monitor(false);
        vad.observe(sample(0, 60.0));
        for i in 1..100u64 {
            assert_eq!(vad.observe(sample(i * 100, 2.0)), Signal::Continue);
        }
        // The latch still works for the meter.
        assert!(vad.speech_detected());
    }
}

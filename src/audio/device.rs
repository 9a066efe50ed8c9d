use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::VoiceError;

/// One batch of encoded audio from the platform recorder, with the
/// instantaneous input level for the silence monitor and UI meter.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Encoded audio bytes in the negotiated format.
    pub bytes: Vec<u8>,
    /// Input level on a 0-100 scale.
    pub level: f32,
    /// Milliseconds since the recording started.
    pub timestamp_ms: u64,
}

/// Platform microphone abstraction.
///
/// Implementations wrap whatever the platform offers (MediaRecorder,
/// AVAudioRecorder, a native capture API) behind one interface so the turn
/// state machine is written once. The device reports what encodings it can
/// produce; the session picks one via [`negotiate_mime_type`].
#[async_trait::async_trait]
pub trait AudioCaptureDevice: Send + Sync {
    /// Encodings this device can produce, as MIME types. An empty list
    /// means the device only has an unnamed default encoding.
    fn supported_mime_types(&self) -> Vec<String>;

    /// Start capturing in the given encoding.
    ///
    /// Returns a channel receiver of audio chunks. Fails with
    /// `DeviceUnavailable` if the microphone cannot be opened (permission
    /// denied, device busy).
    async fn start(&mut self, mime_type: &str) -> Result<mpsc::Receiver<AudioChunk>, VoiceError>;

    /// Ask the device to emit any batched, not-yet-delivered audio.
    ///
    /// Some platforms buffer encoder output; the recording session calls
    /// this before finalizing so the last chunk is not lost.
    async fn request_flush(&mut self) -> Result<(), VoiceError>;

    /// Stop capturing and close the chunk channel.
    async fn stop(&mut self) -> Result<(), VoiceError>;

    /// Whether the device is currently capturing.
    fn is_capturing(&self) -> bool;

    /// Device name for logging.
    fn name(&self) -> &str;
}

/// Source of capture devices, selected per platform at startup.
///
/// The controller opens a fresh device for every listening phase (the
/// platform may revoke or rebind the microphone between turns), so it
/// holds a factory rather than a device.
pub trait AudioDeviceFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn AudioCaptureDevice>, VoiceError>;
}

/// Factory serving a queue of pre-built devices, for tests and the demo
/// binary. Runs dry with `DeviceUnavailable` once the queue empties.
pub struct QueuedDeviceFactory {
    devices: Mutex<std::collections::VecDeque<Box<dyn AudioCaptureDevice>>>,
}

impl QueuedDeviceFactory {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn push(&self, device: Box<dyn AudioCaptureDevice>) {
        self.devices.lock().unwrap().push_back(device);
    }
}

impl Default for QueuedDeviceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDeviceFactory for QueuedDeviceFactory {
    fn create(&self) -> Result<Box<dyn AudioCaptureDevice>, VoiceError> {
        self.devices
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| VoiceError::DeviceUnavailable {
                message: "no capture device available".to_string(),
            })
    }
}

/// Pick the best encoding: first entry of the preference order the device
/// supports. Falls back to the device default (empty string) when nothing
/// matches or the device has no named encodings.
pub fn negotiate_mime_type(preferred: &[String], supported: &[String]) -> String {
    if supported.is_empty() {
        return String::new();
    }
    preferred
        .iter()
        .find(|p| supported.iter().any(|s| s == *p))
        .cloned()
        .unwrap_or_default()
}

/// A capture device driven by a pre-built script of chunks, for tests and
/// the demo binary. Delivers its script when started; chunks marked as
/// held-back are only emitted once a flush is requested, mimicking
/// platforms that batch encoder output.
pub struct ScriptedDevice {
    mime_types: Vec<String>,
    script: Vec<AudioChunk>,
    held_back: Vec<AudioChunk>,
    capturing: Arc<AtomicBool>,
    deny_access: bool,
    tx: Mutex<Option<mpsc::Sender<AudioChunk>>>,
}

impl ScriptedDevice {
    pub fn new(mime_types: Vec<String>, script: Vec<AudioChunk>) -> Self {
        Self {
            mime_types,
            script,
            held_back: Vec::new(),
            capturing: Arc::new(AtomicBool::new(false)),
            deny_access: false,
            tx: Mutex::new(None),
        }
    }

    /// Chunks delivered only after a flush request.
    pub fn with_held_back(mut self, chunks: Vec<AudioChunk>) -> Self {
        self.held_back = chunks;
        self
    }

    /// Simulate a denied microphone permission.
    pub fn denying_access() -> Self {
        let mut device = Self::new(vec!["audio/webm".to_string()], Vec::new());
        device.deny_access = true;
        device
    }

    /// Build a script of uniform chunks: `count` chunks of `bytes_each`
    /// bytes at the given level, 100ms apart.
    pub fn uniform_script(count: u64, bytes_each: usize, level: f32) -> Vec<AudioChunk> {
        (0..count)
            .map(|i| AudioChunk {
                bytes: vec![0u8; bytes_each],
                level,
                timestamp_ms: i * 100,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl AudioCaptureDevice for ScriptedDevice {
    fn supported_mime_types(&self) -> Vec<String> {
        self.mime_types.clone()
    }

    async fn start(&mut self, _mime_type: &str) -> Result<mpsc::Receiver<AudioChunk>, VoiceError> {
        if self.deny_access {
            return Err(VoiceError::DeviceUnavailable {
                message: "microphone permission denied".to_string(),
            });
        }

        let capacity = (self.script.len() + self.held_back.len()).max(1);
        let (tx, rx) = mpsc::channel(capacity);
        for chunk in self.script.drain(..) {
            // Capacity covers the whole script; try_send cannot fail here.
            let _ = tx.try_send(chunk);
        }
        *self.tx.lock().unwrap() = Some(tx);
        self.capturing.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn request_flush(&mut self) -> Result<(), VoiceError> {
        let tx = self.tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            for chunk in self.held_back.drain(..) {
                let _ = tx.send(chunk).await;
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), VoiceError> {
        self.capturing.store(false, Ordering::SeqCst);
        // Dropping the sender closes the chunk channel.
        *self.tx.lock().unwrap() = None;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs() -> Vec<String> {
        vec![
            "audio/webm".to_string(),
            "audio/mp4".to_string(),
            "audio/pcm;rate=16000".to_string(),
        ]
    }

    #[test]
    fn test_negotiate_prefers_order() {
        let supported = vec!["audio/mp4".to_string(), "audio/webm".to_string()];
        assert_eq!(negotiate_mime_type(&prefs(), &supported), "audio/webm");
    }

    #[test]
    fn test_negotiate_falls_back_to_device_default() {
        let supported = vec!["audio/flac".to_string()];
        assert_eq!(negotiate_mime_type(&prefs(), &supported), "");
        assert_eq!(negotiate_mime_type(&prefs(), &[]), "");
    }

    #[tokio::test]
    async fn test_scripted_device_delivers_script_then_flush() {
        let script = ScriptedDevice::uniform_script(3, 100, 50.0);
        let mut device = ScriptedDevice::new(vec!["audio/webm".to_string()], script)
            .with_held_back(vec![AudioChunk {
                bytes: vec![1u8; 40],
                level: 20.0,
                timestamp_ms: 300,
            }]);

        let mut rx = device.start("audio/webm").await.unwrap();
        assert!(device.is_capturing());

        for _ in 0..3 {
            assert!(rx.recv().await.is_some());
        }

        device.request_flush().await.unwrap();
        let flushed = rx.recv().await.unwrap();
        assert_eq!(flushed.bytes.len(), 40);

        device.stop().await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(!device.is_capturing());
    }

    #[tokio::test]
    async fn test_denied_device_fails_start() {
        let mut device = ScriptedDevice::denying_access();
        let result = device.start("audio/webm").await;
        assert!(matches!(
            result,
            Err(VoiceError::DeviceUnavailable { .. })
        ));
    }
}

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// One fixed-length block of captured audio (mono, normalised f32)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples in [-1.0, 1.0]; length is constant for a given backend config
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Configuration for a capture backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Capture sample rate (the remote session expects 16kHz)
    pub sample_rate: u32,
    /// Samples per frame delivered to the pipeline
    pub frame_len: usize,
    /// Input device name; `None` picks the system default
    pub device_name: Option<String>,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_len: 4096,
            device_name: None,
        }
    }
}

/// Audio capture backend
///
/// Implementations:
/// - `CpalInputBackend`: microphone via cpal (feature `cpal-audio`)
/// - `WavFileBackend`: replays a WAV file at real-time cadence
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquire the device and start capturing
    ///
    /// Returns a channel receiver of fixed-length frames. This is the only
    /// call that may wait on the user (microphone permission prompt).
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Release the device. Safe to call when already stopped.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Where captured audio comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone input
    Microphone,
    /// WAV file input (scripted calls and tests)
    File(String),
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for the given source
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "cpal-audio")]
                {
                    use super::cpal_input::CpalInputBackend;
                    Ok(Box::new(CpalInputBackend::new(config)))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    let _ = config;
                    Err(crate::error::CallError::DeviceUnavailable {
                        device: "microphone (built without the cpal-audio feature)".to_string(),
                    })
                }
            }

            AudioSource::File(path) => {
                use super::file::WavFileBackend;
                Ok(Box::new(WavFileBackend::new(path, config)))
            }
        }
    }
}

/// Re-chunks arbitrary-sized device buffers into fixed-length frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_len: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    emitted_samples: u64,
}

impl FrameAssembler {
    pub fn new(frame_len: usize, sample_rate: u32) -> Self {
        Self {
            frame_len: frame_len.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_len),
            emitted_samples: 0,
        }
    }

    /// Append samples, returning every frame that became complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let take = (self.frame_len - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_len {
                let timestamp_ms = self.emitted_samples * 1000 / self.sample_rate as u64;
                let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len));
                self.emitted_samples += self.frame_len as u64;
                frames.push(AudioFrame {
                    samples,
                    sample_rate: self.sample_rate,
                    timestamp_ms,
                });
            }
        }

        frames
    }
}

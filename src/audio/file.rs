use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, FrameAssembler};
use crate::error::{CallError, Result};

/// A WAV file decoded to mono f32 samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).map_err(|e| CallError::DeviceUnavailable {
            device: format!("{} ({})", path.display(), e),
        })?;

        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
            SampleFormat::Float => reader.into_samples::<f32>().collect(),
        }
        .map_err(|e| CallError::decode(format!("failed to read WAV samples: {}", e)))?;

        let channels = spec.channels.max(1) as usize;
        let samples: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        let duration_seconds = samples.len() as f64 / spec.sample_rate as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate` (linear interpolation)
    pub fn resampled(&self, target_rate: u32) -> Vec<f32> {
        resample_linear(&self.samples, self.sample_rate, target_rate)
    }
}

/// Linear-interpolation resampler for mono audio
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() || source_rate == 0 {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// Capture backend that replays a WAV file at real-time cadence
///
/// Frames are paced by the frame duration so downstream timing matches a
/// live microphone. The receiver closes when the file is exhausted.
pub struct WavFileBackend {
    path: String,
    config: AudioBackendConfig,
    task: Option<JoinHandle<()>>,
}

impl WavFileBackend {
    pub fn new(path: impl Into<String>, config: AudioBackendConfig) -> Self {
        Self {
            path: path.into(),
            config,
            task: None,
        }
    }
}

#[async_trait]
impl AudioBackend for WavFileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            return Err(CallError::DeviceUnavailable {
                device: format!("{} (already capturing)", self.path),
            });
        }

        let file = AudioFile::open(&self.path)?;
        let samples = file.resampled(self.config.sample_rate);

        let mut assembler = FrameAssembler::new(self.config.frame_len, self.config.sample_rate);
        let frames = assembler.push(&samples);
        let frame_period = Duration::from_secs_f64(
            self.config.frame_len as f64 / self.config.sample_rate as f64,
        );

        info!(
            "Replaying {} as {} capture frames ({:?} each)",
            self.path,
            frames.len(),
            frame_period
        );

        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_period);
            for frame in frames {
                ticker.tick().await;
                if tx.send(frame).await.is_err() {
                    debug!("Capture receiver dropped, ending file replay");
                    return;
                }
            }
            debug!("File replay finished");
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped: {}", self.path);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}

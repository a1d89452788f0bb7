//! Microphone capture using CPAL (Cross-Platform Audio Library).

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, FrameAssembler};
use super::file::resample_linear;
use crate::error::{CallError, Result};

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only used from `start`/`stop`, which take
/// `&mut self`, so it is never accessed from two threads at once. `Sync` is
/// required because `AudioBackend` is `Send + Sync`; shared access only
/// checks whether the `Option` holding the stream is set.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}
unsafe impl Sync for SendableStream {}

/// Microphone backend delivering mono f32 frames at the capture rate
pub struct CpalInputBackend {
    config: AudioBackendConfig,
    stream: Option<SendableStream>,
}

impl CpalInputBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    fn find_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();

        match &self.config.device_name {
            Some(name) => {
                let devices = host.input_devices().map_err(|e| CallError::DevicePermission {
                    message: format!("Failed to enumerate input devices: {}", e),
                })?;
                for device in devices {
                    if let Ok(dev_name) = device.name() {
                        if &dev_name == name {
                            return Ok(device);
                        }
                    }
                }
                Err(CallError::DeviceUnavailable {
                    device: name.clone(),
                })
            }
            None => host
                .default_input_device()
                .ok_or_else(|| CallError::DeviceUnavailable {
                    device: "default".to_string(),
                }),
        }
    }

    /// Build the input stream
    ///
    /// Tries f32/mono at the capture rate first, then falls back to the
    /// device's default config with channel mixing and resampling.
    fn build_stream(
        &self,
        device: &cpal::Device,
        tx: mpsc::Sender<AudioFrame>,
    ) -> Result<cpal::Stream> {
        let target_rate = self.config.sample_rate;
        let frame_len = self.config.frame_len;

        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(target_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let assembler = Arc::new(Mutex::new(FrameAssembler::new(frame_len, target_rate)));
        let err_callback = |err| error!("Capture stream error: {}", err);

        {
            let assembler = Arc::clone(&assembler);
            let tx = tx.clone();
            if let Ok(stream) = device.build_input_stream(
                &preferred,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    forward(&assembler, &tx, data);
                },
                err_callback,
                None,
            ) {
                return Ok(stream);
            }
        }

        let default_config = device
            .default_input_config()
            .map_err(|e| CallError::DevicePermission {
                message: format!("Failed to query default input config: {}", e),
            })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels().max(1) as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        warn!(
            "Using native input format ({}ch/{}Hz/{:?}), converting in software",
            native_channels,
            native_rate,
            default_config.sample_format()
        );

        match default_config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = data
                        .chunks(native_channels)
                        .map(|f| f.iter().sum::<f32>() / f.len() as f32)
                        .collect();
                    let converted = resample_linear(&mono, native_rate, target_rate);
                    forward(&assembler, &tx, &converted);
                },
                err_callback,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = data
                        .chunks(native_channels)
                        .map(|f| f.iter().map(|&s| s as f32 / 32768.0).sum::<f32>() / f.len() as f32)
                        .collect();
                    let converted = resample_linear(&mono, native_rate, target_rate);
                    forward(&assembler, &tx, &converted);
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(CallError::DeviceUnavailable {
                    device: format!("input with unsupported sample format {:?}", fmt),
                })
            }
        }
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => CallError::DeviceUnavailable {
                device: "input".to_string(),
            },
            other => CallError::DevicePermission {
                message: other.to_string(),
            },
        })
    }
}

/// Runs on the audio callback thread: never blocks, drops frames the
/// pipeline cannot take.
fn forward(assembler: &Mutex<FrameAssembler>, tx: &mpsc::Sender<AudioFrame>, data: &[f32]) {
    let frames = match assembler.lock() {
        Ok(mut assembler) => assembler.push(data),
        Err(poisoned) => poisoned.into_inner().push(data),
    };
    for frame in frames {
        if tx.try_send(frame).is_err() {
            warn!("Capture pipeline busy, dropping frame");
        }
    }
}

#[async_trait]
impl AudioBackend for CpalInputBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.stream.is_some() {
            return Err(CallError::DeviceUnavailable {
                device: "microphone (already capturing)".to_string(),
            });
        }

        let device = self.find_device()?;
        info!(
            "Opening microphone: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let (tx, rx) = mpsc::channel(32);
        let stream = self.build_stream(&device, tx)?;
        stream.play().map_err(|e| CallError::DevicePermission {
            message: format!("Failed to start capture stream: {}", e),
        })?;

        self.stream = Some(SendableStream(stream));

        info!(
            "Microphone capture started ({}Hz, {} samples/frame)",
            self.config.sample_rate, self.config.frame_len
        );

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(SendableStream(stream)) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause capture stream: {}", e);
            }
            drop(stream);
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

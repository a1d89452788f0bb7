pub mod backend;
pub mod capture;
pub mod codec;
pub mod file;

#[cfg(feature = "cpal-audio")]
pub mod cpal_input;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, FrameAssembler};
pub use capture::{CaptureLevel, CapturePipeline, CaptureStats};
pub use file::{AudioFile, WavFileBackend};

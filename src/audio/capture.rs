// Capture pipeline: microphone frames -> gain -> PCM16 -> transport
//
// The backend delivers fixed-length frames; a forwarding task applies the
// current gain, records the latest samples for the speaking monitor, encodes
// the frame and hands it to the transport's non-blocking sender. A failed
// send drops that frame and capture carries on.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::AudioBackend;
use super::codec;
use crate::error::Result;
use crate::transport::{ChunkSender, TransportChunk};

/// Latest post-gain capture samples, read by the speaking monitor
#[derive(Debug, Default)]
pub struct CaptureLevel {
    latest: Mutex<Vec<f32>>,
}

impl CaptureLevel {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, samples: &[f32]) {
        let mut latest = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        latest.clear();
        latest.extend_from_slice(samples);
    }

    fn clear(&self) {
        self.update(&[]);
    }

    /// RMS of the most recent frame
    pub fn rms(&self) -> f32 {
        match self.latest.lock() {
            Ok(guard) => codec::rms(&guard),
            Err(poisoned) => codec::rms(&poisoned.into_inner()),
        }
    }
}

/// Counters for the capture path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

pub struct CapturePipeline {
    backend: Box<dyn AudioBackend>,
    /// f32 gain stored as raw bits so the forwarding task reads it lock-free
    gain: Arc<AtomicU32>,
    level: Arc<CaptureLevel>,
    frames_sent: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
}

impl CapturePipeline {
    pub fn new(backend: Box<dyn AudioBackend>) -> Self {
        Self {
            backend,
            gain: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            level: Arc::new(CaptureLevel::new()),
            frames_sent: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            task: None,
            started_at: None,
        }
    }

    /// Acquire the capture device and start forwarding frames to `sender`
    pub async fn start(&mut self, sender: ChunkSender) -> Result<()> {
        if self.task.is_some() {
            warn!("Capture already started");
            return Ok(());
        }

        info!("Starting capture from {}", self.backend.name());

        let mut frames = self.backend.start().await?;
        self.started_at = Some(Instant::now());

        let gain = Arc::clone(&self.gain);
        let level = Arc::clone(&self.level);
        let frames_sent = Arc::clone(&self.frames_sent);
        let frames_dropped = Arc::clone(&self.frames_dropped);

        let task = tokio::spawn(async move {
            debug!("Capture forwarding task started");

            while let Some(mut frame) = frames.recv().await {
                let factor = f32::from_bits(gain.load(Ordering::Relaxed));
                codec::apply_gain(&mut frame.samples, factor);
                level.update(&frame.samples);

                let chunk = TransportChunk::from_samples(&frame.samples, frame.sample_rate);
                match sender.send(chunk) {
                    Ok(()) => {
                        frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        frames_dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("Dropping capture frame at {}ms: {}", frame.timestamp_ms, e);
                    }
                }
            }

            debug!("Capture forwarding task stopped");
        });

        self.task = Some(task);
        Ok(())
    }

    /// Scale captured samples before encoding (0.0 mutes without touching the device)
    pub fn set_gain(&self, factor: f32) {
        self.gain.store(factor.to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    /// Shared handle on the latest capture samples
    pub fn level(&self) -> Arc<CaptureLevel> {
        Arc::clone(&self.level)
    }

    /// When the capture device was acquired, if it has been
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }

    /// Detach from the device. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Wait for the forwarding task so no frame is sent after stop returns
            let _ = task.await;
        }

        if let Err(e) = self.backend.stop().await {
            warn!("Failed to stop capture backend {}: {}", self.backend.name(), e);
        }

        self.level.clear();

        if self.started_at.take().is_some() {
            let stats = self.stats();
            info!(
                "Capture stopped: {} frames sent, {} dropped",
                stats.frames_sent, stats.frames_dropped
            );
        }
    }
}

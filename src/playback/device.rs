use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{CallError, Result};

/// Decoded remote audio, mono f32
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Buffer of `secs` seconds of silence (handy for tests and priming)
    pub fn silence(secs: f64, sample_rate: u32) -> Self {
        Self::new(vec![0.0; (secs * sample_rate as f64).round() as usize], sample_rate)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Fired once when a scheduled source finishes naturally
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Handle on one scheduled buffer
pub trait ScheduledSource: Send {
    /// Stop playback now. The completion callback must not fire afterwards.
    fn stop(&self);
}

/// Audio output with a sample-accurate clock
///
/// Contract for implementors:
/// - `now()` is monotonic, in seconds
/// - `on_complete` fires at most once, never from inside `schedule`, and
///   never while holding a lock that `schedule` or `ScheduledSource::stop` takes
pub trait OutputDevice: Send + Sync {
    /// Device clock in seconds
    fn now(&self) -> f64;

    /// Queue `buffer` to start at `start_at` on the device clock
    fn schedule(
        &self,
        buffer: PlaybackBuffer,
        start_at: f64,
        on_complete: CompletionCallback,
    ) -> Result<Box<dyn ScheduledSource>>;

    /// Release the device. Idempotent.
    fn close(&self);

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// Output that keeps time against the wall clock and discards samples
///
/// Used for headless runs: sources still complete on schedule, so the
/// remote-speaking signal behaves exactly as with a real device.
pub struct NullOutputDevice {
    epoch: Instant,
    closed: AtomicBool,
}

impl NullOutputDevice {
    pub fn new() -> Self {
        info!("Using null audio output (playback discarded)");
        Self {
            epoch: Instant::now(),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for NullOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

struct NullSource {
    task: JoinHandle<()>,
    stopped: Arc<AtomicBool>,
}

impl ScheduledSource for NullSource {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

impl OutputDevice for NullOutputDevice {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn schedule(
        &self,
        buffer: PlaybackBuffer,
        start_at: f64,
        on_complete: CompletionCallback,
    ) -> Result<Box<dyn ScheduledSource>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::DeviceUnavailable {
                device: "null output (closed)".to_string(),
            });
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CallError::DeviceUnavailable {
            device: "null output (no async runtime)".to_string(),
        })?;

        let end_at = start_at + buffer.duration_secs();
        let wait = Duration::from_secs_f64((end_at - self.now()).max(0.0));
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_for_task = Arc::clone(&stopped);

        let task = runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            if !stopped_for_task.load(Ordering::SeqCst) {
                on_complete();
            }
        });

        debug!("Null output scheduled {:.3}s..{:.3}s", start_at, end_at);

        Ok(Box::new(NullSource { task, stopped }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Null audio output closed");
        }
    }

    fn name(&self) -> &str {
        "null output"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_buffer_duration() {
        let buffer = PlaybackBuffer::silence(1.5, 24000);
        assert_eq!(buffer.samples.len(), 36000);
        assert!((buffer.duration_secs() - 1.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_output_completes_on_time() {
        let device = NullOutputDevice::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);

        let _source = device
            .schedule(
                PlaybackBuffer::silence(0.5, 1000),
                device.now(),
                Box::new(move || {
                    fired_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_output_stop_suppresses_completion() {
        let device = NullOutputDevice::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);

        let source = device
            .schedule(
                PlaybackBuffer::silence(0.5, 1000),
                device.now(),
                Box::new(move || {
                    fired_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        source.stop();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_null_output_rejects_after_close() {
        let device = NullOutputDevice::new();
        device.close();
        device.close();

        let result = device.schedule(PlaybackBuffer::silence(0.1, 1000), 0.0, Box::new(|| {}));
        assert!(result.is_err());
    }
}

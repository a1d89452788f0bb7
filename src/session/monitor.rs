use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::state::SpeakingState;
use crate::audio::CaptureLevel;
use crate::playback::PlaybackScheduler;

/// Pure speaking decision for one tick
pub fn evaluate(capture_rms: f32, threshold: f32, remote_playing: bool) -> SpeakingState {
    SpeakingState {
        local: capture_rms > threshold,
        remote: remote_playing,
    }
}

/// Periodic observer deriving the speaking indicators
///
/// Reads the latest capture level and the scheduler's active set; never
/// touches audio state.
#[derive(Default)]
pub struct SpeakingMonitor {
    task: Option<JoinHandle<()>>,
}

impl SpeakingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        level: Arc<CaptureLevel>,
        scheduler: Arc<PlaybackScheduler>,
        threshold: f32,
        interval: Duration,
        output: Arc<watch::Sender<SpeakingState>>,
    ) {
        if self.task.is_some() {
            return;
        }

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let next = evaluate(level.rms(), threshold, scheduler.is_playing());
                output.send_if_modified(|current| {
                    if *current != next {
                        debug!("Speaking state: local={} remote={}", next.local, next.remote);
                        *current = next;
                        true
                    } else {
                        false
                    }
                });
            }
        });

        self.task = Some(task);
    }

    /// Stop ticking; no tick runs after this returns. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for SpeakingMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

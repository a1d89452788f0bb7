// Gapless playback scheduling for remote audio
//
// Each enqueued buffer starts at max(cursor, device_now) and advances the
// cursor by the buffer's own duration, so chunks that arrive in bursts or
// with jitter still play back-to-back. The active set holds every source
// that has been scheduled and not yet completed or interrupted; it is the
// only playback state touched from more than one thread (message loop and
// device completion callbacks), and is guarded by a single mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::device::{OutputDevice, PlaybackBuffer, ScheduledSource};
use crate::error::Result;

/// Where a buffer landed on the device timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: u64,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledChunk {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

#[derive(Default)]
struct SchedulerState {
    /// End of the last scheduled buffer; `None` re-anchors to the device clock
    cursor: Option<f64>,
    active: HashMap<u64, Box<dyn ScheduledSource>>,
    next_id: u64,
    closed: bool,
}

pub struct PlaybackScheduler {
    device: Arc<dyn OutputDevice>,
    state: Arc<Mutex<SchedulerState>>,
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PlaybackScheduler {
    pub fn new(device: Arc<dyn OutputDevice>) -> Self {
        info!("Playback scheduler using {}", device.name());
        Self {
            device,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    /// Schedule `buffer` right after everything already queued
    ///
    /// Returns `Ok(None)` once the scheduler has been stopped.
    pub fn enqueue(&self, buffer: PlaybackBuffer) -> Result<Option<ScheduledChunk>> {
        let mut state = lock(&self.state);
        if state.closed {
            debug!("Playback stopped, ignoring late chunk");
            return Ok(None);
        }

        let now = self.device.now();
        let start_at = state.cursor.map_or(now, |cursor| cursor.max(now));
        let duration = buffer.duration_secs();

        let id = state.next_id;
        state.next_id += 1;

        // Natural completion removes the source; a no-op if interrupt got there first
        let weak = Arc::downgrade(&self.state);
        let on_complete = Box::new(move || {
            if let Some(state) = weak.upgrade() {
                lock(&state).active.remove(&id);
            }
        });

        let source = self.device.schedule(buffer, start_at, on_complete)?;

        state.cursor = Some(start_at + duration);
        state.active.insert(id, source);

        debug!(
            "Scheduled chunk {} at {:.3}s ({:.3}s long, {} active)",
            id,
            start_at,
            duration,
            state.active.len()
        );

        Ok(Some(ScheduledChunk {
            id,
            start_at,
            duration,
        }))
    }

    /// Barge-in: stop everything now and re-anchor the next chunk to the device clock
    pub fn interrupt(&self) -> usize {
        let drained = {
            let mut state = lock(&self.state);
            state.cursor = None;
            std::mem::take(&mut state.active)
        };

        let count = drained.len();
        for source in drained.values() {
            source.stop();
        }

        if count > 0 {
            info!("Interrupted playback ({} sources stopped)", count);
        }
        count
    }

    /// Whether any scheduled source is still playing (or waiting to)
    pub fn is_playing(&self) -> bool {
        !lock(&self.state).active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.state).active.len()
    }

    /// Current cursor, `None` when the next chunk will anchor to the device clock
    pub fn cursor(&self) -> Option<f64> {
        lock(&self.state).cursor
    }

    /// Interrupt and release the output device. Idempotent.
    pub fn stop(&self) {
        let drained = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            state.cursor = None;
            std::mem::take(&mut state.active)
        };

        for source in drained.values() {
            source.stop();
        }

        self.device.close();
        info!("Playback stopped ({} sources cancelled)", drained.len());
    }
}

//! Speaker output using CPAL with a sample-accurate scheduling timeline.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{error, info, warn};

use super::device::{CompletionCallback, OutputDevice, PlaybackBuffer, ScheduledSource};
use crate::audio::file::resample_linear;
use crate::error::{CallError, Result};

/// SAFETY: `open` builds and plays the stream on the calling thread, then
/// moves it into the `stream` mutex. After that it is only paused and
/// dropped through that mutex, never from two threads at once.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

struct Voice {
    id: u64,
    start_frame: u64,
    samples: Vec<f32>,
    on_complete: Option<CompletionCallback>,
}

#[derive(Default)]
struct Timeline {
    voices: Vec<Voice>,
    next_id: u64,
}

fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    match timeline.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Default output device; the clock is frames rendered / sample rate
pub struct CpalOutputDevice {
    stream: Mutex<Option<SendableStream>>,
    timeline: Arc<Mutex<Timeline>>,
    frames_rendered: Arc<AtomicU64>,
    sample_rate: u32,
    closed: AtomicBool,
}

impl CpalOutputDevice {
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| CallError::DeviceUnavailable {
                device: "default output".to_string(),
            })?;

        let default_config = device
            .default_output_config()
            .map_err(|e| CallError::DeviceUnavailable {
                device: format!("default output ({})", e),
            })?;

        let sample_rate = default_config.sample_rate().0;
        let channels = default_config.channels().max(1) as usize;
        let stream_config: cpal::StreamConfig = default_config.into();

        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let frames_rendered = Arc::new(AtomicU64::new(0));

        let render_timeline = Arc::clone(&timeline);
        let render_frames = Arc::clone(&frames_rendered);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render(&render_timeline, &render_frames, data, channels);
                },
                |err| error!("Playback stream error: {}", err),
                None,
            )
            .map_err(|e| CallError::DeviceUnavailable {
                device: format!("default output ({})", e),
            })?;

        stream.play().map_err(|e| CallError::DeviceUnavailable {
            device: format!("default output ({})", e),
        })?;

        info!(
            "Audio output opened: {} ({}Hz, {} channels)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate,
            channels
        );

        Ok(Self {
            stream: Mutex::new(Some(SendableStream(stream))),
            timeline,
            frames_rendered,
            sample_rate,
            closed: AtomicBool::new(false),
        })
    }
}

/// Mix every voice overlapping this callback's window into `data`
///
/// Completion callbacks run after the timeline lock is released.
fn render(timeline: &Mutex<Timeline>, frames_rendered: &AtomicU64, data: &mut [f32], channels: usize) {
    data.iter_mut().for_each(|s| *s = 0.0);

    let frames = (data.len() / channels) as u64;
    let base = frames_rendered.load(Ordering::Acquire);
    let window_end = base + frames;

    let finished: Vec<CompletionCallback> = {
        let mut timeline = lock(timeline);

        for voice in &timeline.voices {
            let voice_end = voice.start_frame + voice.samples.len() as u64;
            if voice.start_frame >= window_end || voice_end <= base {
                continue;
            }
            let from = voice.start_frame.max(base);
            let to = voice_end.min(window_end);
            for frame in from..to {
                let sample = voice.samples[(frame - voice.start_frame) as usize];
                let offset = (frame - base) as usize * channels;
                for slot in &mut data[offset..offset + channels] {
                    *slot += sample;
                }
            }
        }

        let mut finished = Vec::new();
        timeline.voices.retain_mut(|voice| {
            let done = voice.start_frame + voice.samples.len() as u64 <= window_end;
            if done {
                if let Some(cb) = voice.on_complete.take() {
                    finished.push(cb);
                }
            }
            !done
        });
        finished
    };

    frames_rendered.store(window_end, Ordering::Release);

    for cb in finished {
        cb();
    }
}

struct CpalSource {
    id: u64,
    timeline: Weak<Mutex<Timeline>>,
}

impl ScheduledSource for CpalSource {
    fn stop(&self) {
        if let Some(timeline) = self.timeline.upgrade() {
            lock(&timeline).voices.retain(|voice| voice.id != self.id);
        }
    }
}

impl OutputDevice for CpalOutputDevice {
    fn now(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(
        &self,
        buffer: PlaybackBuffer,
        start_at: f64,
        on_complete: CompletionCallback,
    ) -> Result<Box<dyn ScheduledSource>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::DeviceUnavailable {
                device: "default output (closed)".to_string(),
            });
        }

        let samples = resample_linear(&buffer.samples, buffer.sample_rate, self.sample_rate);
        let start_frame = (start_at * self.sample_rate as f64).round().max(0.0) as u64;

        let mut timeline = lock(&self.timeline);
        let id = timeline.next_id;
        timeline.next_id += 1;
        timeline.voices.push(Voice {
            id,
            start_frame,
            samples,
            on_complete: Some(on_complete),
        });

        Ok(Box::new(CpalSource {
            id,
            timeline: Arc::downgrade(&self.timeline),
        }))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let stream = match self.stream.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(SendableStream(stream)) = stream {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause playback stream: {}", e);
            }
        }

        lock(&self.timeline).voices.clear();
        info!("Audio output closed");
    }

    fn name(&self) -> &str {
        "cpal output"
    }
}

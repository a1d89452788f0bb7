// Test doubles for driving a CallEngine without network or audio hardware

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use voice_call::audio::{codec, AudioBackend, AudioFrame};
use voice_call::error::{CallError, Result};
use voice_call::playback::{CompletionCallback, OutputDevice, PlaybackBuffer, ScheduledSource};
use voice_call::session::{
    CallEngine, CallState, DeviceProvider, SessionConfig, TranscriptHandoff, TranscriptMessage,
};
use voice_call::transport::{
    ChunkSender, Connection, ServerMessage, SessionSetup, Transport, TransportChunk, TransportCloser,
    TransportEvent,
};

// ============================================================================
// Transport
// ============================================================================

pub enum OpenMode {
    /// Handshake succeeds and `Open` is the first event
    Open,
    /// `open` itself fails
    Fail(CallError),
    /// Handshake succeeds but the remote closes before `Open`
    CloseFirst,
}

/// Test side of one opened connection
pub struct RemoteEnd {
    pub setup: SessionSetup,
    pub events: mpsc::Sender<TransportEvent>,
    pub chunks: mpsc::Receiver<TransportChunk>,
}

impl RemoteEnd {
    pub async fn send(&self, message: ServerMessage) {
        self.events
            .send(TransportEvent::Message(message))
            .await
            .expect("engine stopped reading events");
    }

    pub async fn send_event(&self, event: TransportEvent) {
        self.events.send(event).await.expect("engine stopped reading events");
    }
}

pub struct MockTransport {
    mode: OpenMode,
    remote: Mutex<Option<RemoteEnd>>,
    pub opens: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(mode: OpenMode) -> Self {
        Self {
            mode,
            remote: Mutex::new(None),
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn remote(&self) -> RemoteEnd {
        self.remote
            .lock()
            .unwrap()
            .take()
            .expect("transport was not opened")
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct MockCloser {
    closed: bool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl TransportCloser for MockCloser {
    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, setup: SessionSetup) -> Result<Connection> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let first = match &self.mode {
            OpenMode::Fail(err) => return Err(err.clone()),
            OpenMode::Open => TransportEvent::Open,
            OpenMode::CloseFirst => TransportEvent::Close(Some("busy".to_string())),
        };

        let (sender, chunks) = ChunkSender::channel(64);
        let (events_tx, events) = mpsc::channel(64);
        events_tx.try_send(first).unwrap();

        *self.remote.lock().unwrap() = Some(RemoteEnd {
            setup,
            events: events_tx,
            chunks,
        });

        Ok(Connection {
            sender,
            events,
            closer: Box::new(MockCloser {
                closed: false,
                closes: Arc::clone(&self.closes),
            }),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Devices
// ============================================================================

/// Capture backend fed by the test through an mpsc sender
pub struct ScriptedBackend {
    frames: Option<mpsc::Receiver<AudioFrame>>,
    fail: Option<CallError>,
    capturing: bool,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl AudioBackend for ScriptedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if let Some(err) = self.fail.take() {
            return Err(err);
        }
        let frames = self.frames.take().ok_or_else(|| CallError::DeviceUnavailable {
            device: "scripted (already started)".to_string(),
        })?;
        self.capturing = true;
        Ok(frames)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing = false;
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Output with a hand-driven clock; sources complete on `complete_next`
#[derive(Default)]
pub struct ManualOutput {
    now: Mutex<f64>,
    pub scheduled: Mutex<Vec<(f64, f64)>>,
    pending: Mutex<Vec<(Arc<AtomicBool>, CompletionCallback)>>,
    pub stopped: AtomicUsize,
    pub closed: AtomicBool,
}

struct ManualSource {
    stopped: Arc<AtomicBool>,
    output: Arc<AtomicUsize>,
}

impl ScheduledSource for ManualSource {
    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.output.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl ManualOutput {
    pub fn set_now(&self, t: f64) {
        *self.now.lock().unwrap() = t;
    }

    pub fn starts(&self) -> Vec<f64> {
        self.scheduled.lock().unwrap().iter().map(|(start, _)| *start).collect()
    }

    /// Finish the oldest source that was not stopped
    pub fn complete_next(&self) {
        let callback = {
            let mut pending = self.pending.lock().unwrap();
            pending.retain(|(stopped, _)| !stopped.load(Ordering::SeqCst));
            if pending.is_empty() {
                return;
            }
            pending.remove(0).1
        };
        callback();
    }
}

/// Shares one `ManualOutput` across sessions while counting stops
pub struct SharedOutput(pub Arc<ManualOutput>, Arc<AtomicUsize>);

impl OutputDevice for SharedOutput {
    fn now(&self) -> f64 {
        *self.0.now.lock().unwrap()
    }

    fn schedule(
        &self,
        buffer: PlaybackBuffer,
        start_at: f64,
        on_complete: CompletionCallback,
    ) -> Result<Box<dyn ScheduledSource>> {
        let stopped = Arc::new(AtomicBool::new(false));
        self.0
            .scheduled
            .lock()
            .unwrap()
            .push((start_at, buffer.duration_secs()));
        self.0
            .pending
            .lock()
            .unwrap()
            .push((Arc::clone(&stopped), on_complete));
        Ok(Box::new(ManualSource {
            stopped,
            output: Arc::clone(&self.1),
        }))
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "manual"
    }
}

pub struct TestDevices {
    backends: Mutex<Vec<ScriptedBackend>>,
    pub output: Arc<ManualOutput>,
    pub stopped_sources: Arc<AtomicUsize>,
    pub capture_stops: Arc<AtomicUsize>,
}

impl TestDevices {
    /// Devices for one session; returns the sender feeding capture frames
    pub fn new() -> (Self, mpsc::Sender<AudioFrame>) {
        let (tx, rx) = mpsc::channel(16);
        let devices = Self::with_backend(Some(rx), None);
        (devices, tx)
    }

    pub fn failing(err: CallError) -> Self {
        Self::with_backend(None, Some(err))
    }

    fn with_backend(frames: Option<mpsc::Receiver<AudioFrame>>, fail: Option<CallError>) -> Self {
        let capture_stops = Arc::new(AtomicUsize::new(0));
        Self {
            backends: Mutex::new(vec![ScriptedBackend {
                frames,
                fail,
                capturing: false,
                stops: Arc::clone(&capture_stops),
            }]),
            output: Arc::new(ManualOutput::default()),
            stopped_sources: Arc::new(AtomicUsize::new(0)),
            capture_stops,
        }
    }

    /// Queue a backend for a later session; returns its frame sender
    pub fn add_session(&self) -> mpsc::Sender<AudioFrame> {
        let (tx, rx) = mpsc::channel(16);
        self.backends.lock().unwrap().push(ScriptedBackend {
            frames: Some(rx),
            fail: None,
            capturing: false,
            stops: Arc::clone(&self.capture_stops),
        });
        tx
    }
}

impl DeviceProvider for TestDevices {
    fn capture_backend(&self) -> Result<Box<dyn AudioBackend>> {
        let mut backends = self.backends.lock().unwrap();
        if backends.is_empty() {
            return Err(CallError::DeviceUnavailable {
                device: "scripted".to_string(),
            });
        }
        Ok(Box::new(backends.remove(0)))
    }

    fn output_device(&self) -> Result<Arc<dyn OutputDevice>> {
        Ok(Arc::new(SharedOutput(
            Arc::clone(&self.output),
            Arc::clone(&self.stopped_sources),
        )))
    }
}

// ============================================================================
// Hand-off
// ============================================================================

#[derive(Default)]
pub struct CollectingHandoff {
    pub delivered: Mutex<Vec<TranscriptMessage>>,
    pub fail: bool,
}

impl CollectingHandoff {
    pub fn failing() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl TranscriptHandoff for CollectingHandoff {
    async fn deliver(&self, message: TranscriptMessage) -> anyhow::Result<()> {
        self.delivered.lock().unwrap().push(message);
        if self.fail {
            anyhow::bail!("analysis service unavailable");
        }
        Ok(())
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub fn test_config() -> SessionConfig {
    SessionConfig {
        tick_interval: Duration::from_millis(10),
        ..SessionConfig::default()
    }
}

pub struct Fixture {
    pub engine: CallEngine,
    pub transport: Arc<MockTransport>,
    pub devices: Arc<TestDevices>,
    pub handoff: Arc<CollectingHandoff>,
    pub frames: mpsc::Sender<AudioFrame>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(OpenMode::Open, CollectingHandoff::default(), test_config())
    }

    pub fn build(mode: OpenMode, handoff: CollectingHandoff, config: SessionConfig) -> Self {
        let transport = Arc::new(MockTransport::new(mode));
        let (devices, frames) = TestDevices::new();
        let devices = Arc::new(devices);
        let handoff = Arc::new(handoff);

        let engine = CallEngine::new(
            config,
            transport.clone(),
            devices.clone(),
            handoff.clone(),
        );

        Self {
            engine,
            transport,
            devices,
            handoff,
            frames,
        }
    }
}

/// Frame of constant amplitude at the capture rate
pub fn frame(amplitude: f32, len: usize) -> AudioFrame {
    AudioFrame {
        samples: vec![amplitude; len],
        sample_rate: 16000,
        timestamp_ms: 0,
    }
}

/// Remote audio message of `secs` seconds at 24kHz
pub fn remote_audio(secs: f64) -> ServerMessage {
    let samples = vec![0.25f32; (24000.0 * secs) as usize];
    ServerMessage::Audio {
        data: codec::encode_base64(&codec::f32_to_pcm16(&samples)),
        sample_rate: None,
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 3s");
}

pub async fn wait_for_state(engine: &CallEngine, state: CallState) {
    wait_until(|| engine.state() == state).await;
}

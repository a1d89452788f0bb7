// Session lifecycle controller
//
// One `CallEngine` conducts one conversation at a time. `start` opens the
// transport, waits for it to come up, then acquires the devices and wires
// capture -> transport -> (playback scheduler + transcript aggregator).
// Every exit path (user stop, remote close, transport error) funnels into
// `end_session`, which takes the session out of its slot exactly once and
// releases everything it owns before the slot lock is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::handoff::{TranscriptHandoff, TranscriptMessage};
use super::monitor::SpeakingMonitor;
use super::state::{CallSnapshot, CallState, SpeakingState};
use crate::audio::{codec, AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioSource, CapturePipeline};
use crate::error::{CallError, Result};
use crate::playback::{self, OutputDevice, PlaybackBuffer, PlaybackScheduler};
use crate::transcript::{Channel, ConversationTranscript, LiveTranscript, TranscriptAggregator};
use crate::transport::{
    pcm_mime_type, ChunkSender, Connection, ServerMessage, SessionSetup, Transport, TransportCloser,
    TransportEvent,
};

/// Persona / instruction payload supplied by the scenario authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub title: Option<String>,
    pub instructions: String,
}

impl Scenario {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            title: None,
            instructions: instructions.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Acquires the audio devices for a session
pub trait DeviceProvider: Send + Sync {
    fn capture_backend(&self) -> Result<Box<dyn AudioBackend>>;
    fn output_device(&self) -> Result<Arc<dyn OutputDevice>>;
}

/// Capture from `AudioSource`, play on the default output
pub struct DefaultDevices {
    source: AudioSource,
    backend: AudioBackendConfig,
}

impl DefaultDevices {
    pub fn new(source: AudioSource, backend: AudioBackendConfig) -> Self {
        Self { source, backend }
    }
}

impl DeviceProvider for DefaultDevices {
    fn capture_backend(&self) -> Result<Box<dyn AudioBackend>> {
        AudioBackendFactory::create(self.source.clone(), self.backend.clone())
    }

    fn output_device(&self) -> Result<Arc<dyn OutputDevice>> {
        playback::open_default_output()
    }
}

enum EndReason {
    UserStop,
    RemoteClose(Option<String>),
    Failed(CallError),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::UserStop => write!(f, "stopped by user"),
            EndReason::RemoteClose(Some(reason)) => write!(f, "closed by remote: {}", reason),
            EndReason::RemoteClose(None) => write!(f, "closed by remote"),
            EndReason::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Everything one live conversation owns
struct Session {
    id: String,
    scenario: Scenario,
    started_at: DateTime<Utc>,
    capture: CapturePipeline,
    unmuted_gain: f32,
    scheduler: Arc<PlaybackScheduler>,
    sender: Option<ChunkSender>,
    closer: Box<dyn TransportCloser>,
    monitor: SpeakingMonitor,
    timer: Option<JoinHandle<()>>,
    message_loop: Option<JoinHandle<()>>,
    torn_down: Arc<AtomicBool>,
}

impl Session {
    /// Release every owned resource; stale callbacks become no-ops
    async fn release(&mut self) {
        self.torn_down.store(true, Ordering::SeqCst);

        self.monitor.stop().await;
        for task in [self.timer.take(), self.message_loop.take()].into_iter().flatten() {
            task.abort();
            let _ = task.await;
        }

        self.capture.stop().await;
        self.scheduler.stop();
        self.sender.take();

        if let Err(e) = self.closer.close().await {
            warn!("Failed to close transport for {}: {}", self.id, e);
        }
    }
}

#[derive(Debug, Default)]
struct SessionDetails {
    session_id: Option<String>,
    title: Option<String>,
    error: Option<String>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct EngineInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    devices: Arc<dyn DeviceProvider>,
    handoff: Arc<dyn TranscriptHandoff>,

    /// The live session, if any; holding this lock serialises start/stop/mute
    session: Mutex<Option<Session>>,

    state: watch::Sender<CallState>,
    speaking: Arc<watch::Sender<SpeakingState>>,
    aggregator: Arc<StdMutex<TranscriptAggregator>>,
    muted: AtomicBool,
    elapsed_secs: Arc<AtomicU64>,
    details: StdMutex<SessionDetails>,
}

/// Live duplex voice conversation engine
#[derive(Clone)]
pub struct CallEngine {
    inner: Arc<EngineInner>,
}

impl CallEngine {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        devices: Arc<dyn DeviceProvider>,
        handoff: Arc<dyn TranscriptHandoff>,
    ) -> Self {
        info!(
            "Call engine ready (transport: {}, capture {}Hz, playback {}Hz)",
            transport.name(),
            config.capture_sample_rate,
            config.playback_sample_rate
        );

        let (state, _) = watch::channel(CallState::Idle);
        let (speaking, _) = watch::channel(SpeakingState::default());

        Self {
            inner: Arc::new(EngineInner {
                config,
                transport,
                devices,
                handoff,
                session: Mutex::new(None),
                state,
                speaking: Arc::new(speaking),
                aggregator: Arc::new(StdMutex::new(TranscriptAggregator::new())),
                muted: AtomicBool::new(false),
                elapsed_secs: Arc::new(AtomicU64::new(0)),
                details: StdMutex::new(SessionDetails::default()),
            }),
        }
    }

    /// Begin a conversation; returns the session id once audio is flowing
    pub async fn start(&self, scenario: Scenario) -> Result<String> {
        let inner = &self.inner;
        let mut slot = inner.session.lock().await;

        let current = inner.current_state();
        if current != CallState::Idle || slot.is_some() {
            return Err(CallError::InvalidState {
                expected: CallState::Idle.to_string(),
                actual: current,
            });
        }

        let session_id = format!("call-{}", Uuid::new_v4());
        info!("Starting call {}", session_id);

        {
            let mut details = lock(&inner.details);
            details.session_id = Some(session_id.clone());
            details.title = scenario.title.clone();
            details.error = None;
        }
        inner.muted.store(false, Ordering::SeqCst);
        inner.elapsed_secs.store(0, Ordering::SeqCst);
        inner.set_state(CallState::Connecting);

        match inner.connect(&session_id, scenario).await {
            Ok(session) => {
                *slot = Some(session);
                inner.set_state(CallState::Active);
                info!("Call {} is live", session_id);
                Ok(session_id)
            }
            Err(e) => {
                error!("Call {} failed to start: {}", session_id, e);
                lock(&inner.details).error = Some(e.to_string());
                inner.set_state(CallState::Error);
                Err(e)
            }
        }
    }

    /// End the conversation. Idempotent; returns the resulting state.
    pub async fn stop(&self) -> CallState {
        self.inner.end_session(EndReason::UserStop).await;
        self.state()
    }

    /// Flip mute; returns the new mute flag. The capture device stays open.
    pub async fn toggle_mute(&self) -> Result<bool> {
        let slot = self.inner.session.lock().await;
        let state = self.inner.current_state();

        let session = match slot.as_ref() {
            Some(session) if state == CallState::Active => session,
            _ => {
                return Err(CallError::InvalidState {
                    expected: CallState::Active.to_string(),
                    actual: state,
                })
            }
        };

        let muted = !self.inner.muted.load(Ordering::SeqCst);
        session
            .capture
            .set_gain(if muted { 0.0 } else { session.unmuted_gain });
        self.inner.muted.store(muted, Ordering::SeqCst);

        info!("Call {} {}", session.id, if muted { "muted" } else { "unmuted" });
        Ok(muted)
    }

    /// Return to idle from results or error, clearing all session state
    pub async fn reset(&self) -> Result<()> {
        let slot = self.inner.session.lock().await;
        let state = self.inner.current_state();

        if !state.can_reset() || slot.is_some() {
            return Err(CallError::InvalidState {
                expected: "idle, results or error".to_string(),
                actual: state,
            });
        }

        *lock(&self.inner.aggregator) = TranscriptAggregator::new();
        *lock(&self.inner.details) = SessionDetails::default();
        self.inner.muted.store(false, Ordering::SeqCst);
        self.inner.elapsed_secs.store(0, Ordering::SeqCst);
        self.inner.speaking.send_replace(SpeakingState::default());
        self.inner.set_state(CallState::Idle);

        debug!("Call engine reset");
        Ok(())
    }

    pub fn state(&self) -> CallState {
        self.inner.current_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CallState> {
        self.inner.state.subscribe()
    }

    pub fn speaking(&self) -> SpeakingState {
        *self.inner.speaking.borrow()
    }

    pub fn subscribe_speaking(&self) -> watch::Receiver<SpeakingState> {
        self.inner.speaking.subscribe()
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.inner.elapsed_secs.load(Ordering::Relaxed)
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.details).error.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        lock(&self.inner.details).session_id.clone()
    }

    /// Committed turns so far (the final transcript once the call ends)
    pub fn transcript(&self) -> ConversationTranscript {
        lock(&self.inner.aggregator).transcript().clone()
    }

    /// Committed turns plus partial text still streaming in
    pub fn live_transcript(&self) -> LiveTranscript {
        lock(&self.inner.aggregator).live()
    }

    /// When the current session acquired its capture device
    pub async fn capture_started_at(&self) -> Option<Instant> {
        let slot = self.inner.session.lock().await;
        slot.as_ref().and_then(|session| session.capture.started_at())
    }

    /// Gain currently applied to captured audio
    pub async fn capture_gain(&self) -> Option<f32> {
        let slot = self.inner.session.lock().await;
        slot.as_ref().map(|session| session.capture.gain())
    }

    /// Number of playback sources scheduled and not yet finished
    pub async fn active_playback(&self) -> usize {
        let slot = self.inner.session.lock().await;
        slot.as_ref()
            .map(|session| session.scheduler.active_count())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let details = lock(&self.inner.details);
        CallSnapshot {
            session_id: details.session_id.clone(),
            title: details.title.clone(),
            state: self.state(),
            muted: self.is_muted(),
            elapsed_secs: self.elapsed_secs(),
            speaking: self.speaking(),
            turns: lock(&self.inner.aggregator).transcript().len(),
            error: details.error.clone(),
        }
    }
}

impl EngineInner {
    fn current_state(&self) -> CallState {
        *self.state.borrow()
    }

    fn set_state(&self, next: CallState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("Call state: {} -> {}", previous, next);
        }
    }

    /// Open the transport, wait for it to come up, then acquire devices
    ///
    /// On failure everything acquired so far is released before returning.
    async fn connect(self: &Arc<Self>, session_id: &str, scenario: Scenario) -> Result<Session> {
        let setup = SessionSetup {
            session_id: session_id.to_string(),
            title: scenario.title.clone(),
            instructions: scenario.instructions.clone(),
            input_mime: pcm_mime_type(self.config.capture_sample_rate),
            output_sample_rate: self.config.playback_sample_rate,
            timestamp: Utc::now().to_rfc3339(),
        };

        let Connection {
            sender,
            mut events,
            mut closer,
        } = self.transport.open(setup).await?;

        let opened = match events.recv().await {
            Some(TransportEvent::Open) => Ok(()),
            Some(TransportEvent::Error(message)) => Err(CallError::transport(message)),
            Some(TransportEvent::Close(reason)) => Err(CallError::transport(format!(
                "session closed while connecting ({})",
                reason.unwrap_or_else(|| "no reason given".to_string())
            ))),
            Some(TransportEvent::Message(message)) => Err(CallError::transport(format!(
                "expected open, got {:?}",
                message
            ))),
            None => Err(CallError::transport("connection dropped while connecting")),
        };
        if let Err(e) = opened {
            close_quietly(closer.as_mut()).await;
            return Err(e);
        }

        let output = match self.devices.output_device() {
            Ok(output) => output,
            Err(e) => {
                close_quietly(closer.as_mut()).await;
                return Err(e);
            }
        };
        let scheduler = Arc::new(PlaybackScheduler::new(output));

        let backend = match self.devices.capture_backend() {
            Ok(backend) => backend,
            Err(e) => {
                scheduler.stop();
                close_quietly(closer.as_mut()).await;
                return Err(e);
            }
        };

        let mut capture = CapturePipeline::new(backend);
        if let Err(e) = capture.start(sender.clone()).await {
            capture.stop().await;
            scheduler.stop();
            close_quietly(closer.as_mut()).await;
            return Err(e);
        }

        let torn_down = Arc::new(AtomicBool::new(false));

        let message_loop = tokio::spawn(run_message_loop(
            Arc::downgrade(self),
            events,
            Arc::clone(&scheduler),
            Arc::clone(&self.aggregator),
            Arc::clone(&torn_down),
            self.config.playback_sample_rate,
        ));

        let timer = spawn_duration_timer(Arc::clone(&self.elapsed_secs));

        let mut monitor = SpeakingMonitor::new();
        monitor.start(
            capture.level(),
            Arc::clone(&scheduler),
            self.config.speaking_threshold,
            self.config.tick_interval,
            Arc::clone(&self.speaking),
        );

        let unmuted_gain = capture.gain();

        Ok(Session {
            id: session_id.to_string(),
            scenario,
            started_at: Utc::now(),
            capture,
            unmuted_gain,
            scheduler,
            sender: Some(sender),
            closer,
            monitor,
            timer: Some(timer),
            message_loop: Some(message_loop),
            torn_down,
        })
    }

    /// The single teardown routine for every exit path
    async fn end_session(self: &Arc<Self>, reason: EndReason) {
        let mut slot = self.session.lock().await;
        let Some(mut session) = slot.take() else {
            debug!("No live session to end ({})", reason);
            return;
        };

        info!("Ending call {} ({})", session.id, reason);

        session.release().await;
        self.speaking.send_replace(SpeakingState::default());

        match reason {
            EndReason::Failed(err) => {
                lock(&self.aggregator).discard_pending();
                error!("Call {} failed: {}", session.id, err);
                lock(&self.details).error = Some(err.to_string());
                self.set_state(CallState::Error);
            }
            EndReason::UserStop | EndReason::RemoteClose(_) => {
                let transcript = {
                    let mut aggregator = lock(&self.aggregator);
                    if self.config.salvage_partial_turn {
                        aggregator.flush();
                    } else {
                        aggregator.discard_pending();
                    }
                    aggregator.transcript().clone()
                };

                if transcript.is_empty() {
                    info!("Call {} ended with an empty transcript, skipping hand-off", session.id);
                } else {
                    self.set_state(CallState::Analyzing);
                    let message = TranscriptMessage::new(
                        &session.id,
                        session.scenario.title.clone(),
                        session.started_at,
                        self.elapsed_secs.load(Ordering::Relaxed),
                        &transcript,
                    );
                    if let Err(e) = self.handoff.deliver(message).await {
                        warn!("Post-call hand-off for {} failed: {:#}", session.id, e);
                    }
                }

                self.set_state(CallState::Results);
            }
        }
    }
}

async fn close_quietly(closer: &mut dyn TransportCloser) {
    if let Err(e) = closer.close().await {
        warn!("Failed to close transport: {}", e);
    }
}

fn spawn_duration_timer(elapsed: Arc<AtomicU64>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            elapsed.fetch_add(1, Ordering::Relaxed);
        }
    })
}

/// Inbound event loop: transport -> playback scheduler / transcript aggregator
async fn run_message_loop(
    engine: Weak<EngineInner>,
    mut events: mpsc::Receiver<TransportEvent>,
    scheduler: Arc<PlaybackScheduler>,
    aggregator: Arc<StdMutex<TranscriptAggregator>>,
    torn_down: Arc<AtomicBool>,
    playback_rate: u32,
) {
    debug!("Message loop started");

    let reason = loop {
        let Some(event) = events.recv().await else {
            break EndReason::Failed(CallError::transport("connection dropped"));
        };

        if torn_down.load(Ordering::SeqCst) {
            return;
        }

        match event {
            TransportEvent::Open => debug!("Ignoring repeated open event"),
            TransportEvent::Message(message) => {
                if let Some(reason) = handle_message(message, &scheduler, &aggregator, playback_rate) {
                    break reason;
                }
            }
            TransportEvent::Error(message) => break EndReason::Failed(CallError::transport(message)),
            TransportEvent::Close(reason) => break EndReason::RemoteClose(reason),
        }
    };

    debug!("Message loop finished ({})", reason);

    // Teardown aborts this task, so it runs on its own
    if let Some(engine) = engine.upgrade() {
        tokio::spawn(async move {
            engine.end_session(reason).await;
        });
    }
}

fn handle_message(
    message: ServerMessage,
    scheduler: &PlaybackScheduler,
    aggregator: &StdMutex<TranscriptAggregator>,
    playback_rate: u32,
) -> Option<EndReason> {
    match message {
        ServerMessage::Audio { data, sample_rate } => {
            match decode_audio(&data, sample_rate.unwrap_or(playback_rate)) {
                Ok(buffer) => {
                    if let Err(e) = scheduler.enqueue(buffer) {
                        warn!("Failed to schedule playback chunk: {}", e);
                    }
                }
                Err(e) => warn!("Dropping audio chunk: {}", e),
            }
        }
        ServerMessage::InputTranscript { text } => {
            lock(aggregator).append_fragment(Channel::Local, &text);
        }
        ServerMessage::OutputTranscript { text } => {
            lock(aggregator).append_fragment(Channel::Remote, &text);
        }
        ServerMessage::Interrupted => {
            scheduler.interrupt();
        }
        ServerMessage::TurnComplete => {
            let committed = lock(aggregator).on_turn_complete();
            for turn in committed {
                info!("[{}] {}", turn.channel, turn.text);
            }
        }
        ServerMessage::SetupComplete => debug!("Ignoring late setup_complete"),
        ServerMessage::Close { reason } => return Some(EndReason::RemoteClose(reason)),
        ServerMessage::Error { message } => {
            return Some(EndReason::Failed(CallError::transport(message)))
        }
    }

    None
}

fn decode_audio(data: &str, sample_rate: u32) -> Result<PlaybackBuffer> {
    let bytes = codec::decode_base64(data)?;
    let samples = codec::pcm16_to_f32(&bytes)?;
    Ok(PlaybackBuffer::new(samples, sample_rate))
}

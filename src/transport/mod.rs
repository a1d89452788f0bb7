//! Bidirectional streaming connection to the remote voice session
//!
//! The engine only sees the `Transport` trait: `open` performs the connect
//! handshake and yields a `Connection` made of
//! - a non-blocking `ChunkSender` for outbound microphone audio
//! - an ordered stream of `TransportEvent`s (open, message, error, close)
//! - a `TransportCloser` that tears the connection down

mod messages;
mod nats;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::codec;
use crate::error::{CallError, Result};

pub use messages::{AudioChunkMessage, ControlMessage, ServerMessage, SessionSetup};
pub use nats::{NatsTransport, NatsTransportConfig};
pub(crate) use nats::session_subject;

/// MIME tag for 16-bit little-endian PCM at `sample_rate`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// One encoded outbound audio frame
#[derive(Debug, Clone, PartialEq)]
pub struct TransportChunk {
    mime_type: String,
    data: Vec<u8>,
}

impl TransportChunk {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Encode normalised samples as PCM16
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self::new(pcm_mime_type(sample_rate), codec::f32_to_pcm16(samples))
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload in the transport-safe text encoding
    pub fn to_base64(&self) -> String {
        codec::encode_base64(&self.data)
    }
}

/// Non-blocking handle for outbound audio
///
/// Safe to call from the capture path: a full queue or closed connection is
/// reported as `CallError::Send` instead of waiting.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<TransportChunk>,
}

impl ChunkSender {
    pub fn new(tx: mpsc::Sender<TransportChunk>) -> Self {
        Self { tx }
    }

    /// Sender plus the receiving end a transport drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransportChunk>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn send(&self, chunk: TransportChunk) -> Result<()> {
        self.tx.try_send(chunk).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CallError::Send {
                message: "outbound queue full".to_string(),
            },
            mpsc::error::TrySendError::Closed(_) => CallError::Send {
                message: "transport closed".to_string(),
            },
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Inbound events, delivered in order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake finished; the session is live
    Open,
    /// Audio, transcript or control message from the remote session
    Message(ServerMessage),
    /// Connection failed
    Error(String),
    /// Remote side closed the session
    Close(Option<String>),
}

/// Tears down a connection. Must be idempotent.
#[async_trait]
pub trait TransportCloser: Send + Sync {
    async fn close(&mut self) -> Result<()>;
}

/// A live connection for one session
pub struct Connection {
    pub sender: ChunkSender,
    pub events: mpsc::Receiver<TransportEvent>,
    pub closer: Box<dyn TransportCloser>,
}

/// Connection factory for remote voice sessions
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection and run the setup handshake
    ///
    /// The first event on a successful connection is `TransportEvent::Open`.
    async fn open(&self, setup: SessionSetup) -> Result<Connection>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}

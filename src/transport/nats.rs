use async_nats::Client;
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::messages::{AudioChunkMessage, ControlMessage, ServerMessage, SessionSetup};
use super::{ChunkSender, Connection, Transport, TransportChunk, TransportCloser, TransportEvent};
use crate::error::{CallError, Result};

/// Settings for the NATS binding
#[derive(Debug, Clone)]
pub struct NatsTransportConfig {
    /// Subject prefix, e.g. "voice" -> "voice.session.<id>.audio"
    pub subject_prefix: String,
    /// How long to wait for the setup reply
    pub connect_timeout: Duration,
    /// Outbound chunk queue depth
    pub outbound_queue: usize,
}

impl Default for NatsTransportConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "voice".to_string(),
            connect_timeout: Duration::from_secs(10),
            outbound_queue: 64,
        }
    }
}

/// Voice session transport over NATS
///
/// Subjects per session:
/// - `<prefix>.session.<id>.setup`: handshake request (reply = `setup_complete`)
/// - `<prefix>.session.<id>.audio`: outbound microphone chunks
/// - `<prefix>.session.<id>.events`: inbound `ServerMessage`s
/// - `<prefix>.session.<id>.control`: close notice
/// - `<prefix>.session.<id>.transcript`: finished transcript (see `NatsTranscriptPublisher`)
pub struct NatsTransport {
    client: Client,
    config: NatsTransportConfig,
}

impl NatsTransport {
    /// Connect to NATS server
    pub async fn connect(url: &str, config: NatsTransportConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client, config })
    }

    /// Underlying client, shared with the transcript publisher
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn subject(&self, session_id: &str, leaf: &str) -> String {
        session_subject(&self.config.subject_prefix, session_id, leaf)
    }
}

pub(crate) fn session_subject(prefix: &str, session_id: &str, leaf: &str) -> String {
    format!("{}.session.{}.{}", prefix, session_id, leaf)
}

#[async_trait]
impl Transport for NatsTransport {
    async fn open(&self, setup: SessionSetup) -> Result<Connection> {
        let session_id = setup.session_id.clone();
        let events_subject = self.subject(&session_id, "events");
        let setup_subject = self.subject(&session_id, "setup");

        // Subscribe before the handshake so no early event is lost
        info!("Subscribing to session events on {}", events_subject);
        let mut subscriber = self
            .client
            .subscribe(events_subject.clone())
            .await
            .map_err(|e| CallError::transport(format!("Failed to subscribe to {}: {}", events_subject, e)))?;

        let payload = serde_json::to_vec(&setup)
            .map_err(|e| CallError::transport(format!("Failed to encode session setup: {}", e)))?;

        let timeout_ms = self.config.connect_timeout.as_millis() as u64;
        let reply = tokio::time::timeout(
            self.config.connect_timeout,
            self.client.request(setup_subject.clone(), payload.into()),
        )
        .await
        .map_err(|_| CallError::ConnectTimeout { timeout_ms })?
        .map_err(|e| CallError::transport(format!("Setup request on {} failed: {}", setup_subject, e)))?;

        match serde_json::from_slice::<ServerMessage>(&reply.payload) {
            Ok(ServerMessage::SetupComplete) => {
                info!("Voice session {} set up", session_id);
            }
            Ok(ServerMessage::Error { message }) => {
                return Err(CallError::transport(format!("Session setup rejected: {}", message)));
            }
            Ok(other) => {
                return Err(CallError::transport(format!(
                    "Unexpected setup reply: {:?}",
                    other
                )));
            }
            Err(e) => {
                return Err(CallError::transport(format!("Malformed setup reply: {}", e)));
            }
        }

        let (events_tx, events_rx) = mpsc::channel(256);
        // Receiver is still held locally, so this cannot fail
        let _ = events_tx.send(TransportEvent::Open).await;

        // Inbound: subscription -> ordered events
        let reader = tokio::spawn(async move {
            debug!("Session event reader started");

            while let Some(msg) = subscriber.next().await {
                let event = match serde_json::from_slice::<ServerMessage>(&msg.payload) {
                    Ok(ServerMessage::Close { reason }) => TransportEvent::Close(reason),
                    Ok(ServerMessage::Error { message }) => TransportEvent::Error(message),
                    Ok(message) => TransportEvent::Message(message),
                    Err(e) => {
                        warn!("Failed to parse session event: {}", e);
                        continue;
                    }
                };

                let terminal = matches!(event, TransportEvent::Close(_) | TransportEvent::Error(_));
                if events_tx.send(event).await.is_err() {
                    debug!("Event receiver dropped, stopping reader");
                    return;
                }
                if terminal {
                    return;
                }
            }

            let _ = events_tx
                .send(TransportEvent::Close(Some("subscription ended".to_string())))
                .await;
        });

        // Outbound: chunk queue -> audio subject
        let (sender, mut chunks) = ChunkSender::channel(self.config.outbound_queue);
        let client = self.client.clone();
        let audio_subject = self.subject(&session_id, "audio");
        let writer_session = session_id.clone();
        let writer = tokio::spawn(async move {
            let mut sequence: u64 = 0;

            while let Some(chunk) = chunks.recv().await {
                if let Err(e) = publish_chunk(&client, &audio_subject, &writer_session, sequence, &chunk).await {
                    warn!("Failed to publish audio chunk {}: {}", sequence, e);
                }
                sequence += 1;
            }

            debug!("Audio writer stopped after {} chunks", sequence);
        });

        Ok(Connection {
            sender,
            events: events_rx,
            closer: Box::new(NatsCloser {
                client: self.client.clone(),
                control_subject: self.subject(&session_id, "control"),
                session_id,
                reader: Some(reader),
                writer: Some(writer),
            }),
        })
    }

    fn name(&self) -> &str {
        "NATS"
    }
}

async fn publish_chunk(
    client: &Client,
    subject: &str,
    session_id: &str,
    sequence: u64,
    chunk: &TransportChunk,
) -> anyhow::Result<()> {
    let message = AudioChunkMessage {
        session_id: session_id.to_string(),
        sequence,
        mime_type: chunk.mime_type().to_string(),
        data: chunk.to_base64(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    let payload = serde_json::to_vec(&message)?;
    client.publish(subject.to_string(), payload.into()).await?;

    debug!(
        "Published audio chunk to {} (seq={}, bytes={})",
        subject,
        sequence,
        chunk.data().len()
    );

    Ok(())
}

struct NatsCloser {
    client: Client,
    control_subject: String,
    session_id: String,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

#[async_trait]
impl TransportCloser for NatsCloser {
    async fn close(&mut self) -> Result<()> {
        if self.reader.is_none() && self.writer.is_none() {
            return Ok(());
        }

        info!("Closing voice session {}", self.session_id);

        for task in [self.reader.take(), self.writer.take()].into_iter().flatten() {
            task.abort();
        }

        let notice = ControlMessage {
            session_id: self.session_id.clone(),
            action: "close".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let payload = serde_json::to_vec(&notice)
            .map_err(|e| CallError::transport(format!("Failed to encode close notice: {}", e)))?;

        if let Err(e) = self.client.publish(self.control_subject.clone(), payload.into()).await {
            error!("Failed to publish close notice: {}", e);
            return Err(CallError::transport(e.to_string()));
        }

        if let Err(e) = self.client.flush().await {
            warn!("Failed to flush NATS connection: {}", e);
        }

        Ok(())
    }
}

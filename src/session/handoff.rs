use anyhow::{Context, Result};
use async_nats::Client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::transcript::{ConversationTranscript, TurnRecord};
use crate::transport::NatsTransport;

/// A finished conversation as handed to post-call analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub session_id: String,
    pub title: Option<String>,
    pub started_at: String,  // RFC3339 timestamp
    pub duration_secs: u64,
    pub turns: Vec<TurnRecord>,
}

impl TranscriptMessage {
    pub fn new(
        session_id: &str,
        title: Option<String>,
        started_at: chrono::DateTime<chrono::Utc>,
        duration_secs: u64,
        transcript: &ConversationTranscript,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            title,
            started_at: started_at.to_rfc3339(),
            duration_secs,
            turns: transcript.turns().to_vec(),
        }
    }
}

/// Receiver of finished, non-empty transcripts (post-call analysis)
#[async_trait]
pub trait TranscriptHandoff: Send + Sync {
    async fn deliver(&self, message: TranscriptMessage) -> Result<()>;
}

/// Writes the transcript to the log
pub struct LogHandoff;

#[async_trait]
impl TranscriptHandoff for LogHandoff {
    async fn deliver(&self, message: TranscriptMessage) -> Result<()> {
        info!(
            "Conversation {} finished: {} turns in {}s",
            message.session_id,
            message.turns.len(),
            message.duration_secs
        );
        for turn in &message.turns {
            info!("  #{} {}: {}", turn.sequence, turn.channel, turn.text);
        }
        Ok(())
    }
}

/// Publishes transcripts on `<prefix>.session.<id>.transcript`
pub struct NatsTranscriptPublisher {
    client: Client,
    subject_prefix: String,
}

impl NatsTranscriptPublisher {
    pub fn new(client: Client, subject_prefix: impl Into<String>) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.into(),
        }
    }

    pub fn for_transport(transport: &NatsTransport, subject_prefix: impl Into<String>) -> Self {
        Self::new(transport.client(), subject_prefix)
    }
}

#[async_trait]
impl TranscriptHandoff for NatsTranscriptPublisher {
    async fn deliver(&self, message: TranscriptMessage) -> Result<()> {
        let subject = crate::transport::session_subject(&self.subject_prefix, &message.session_id, "transcript");
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish transcript")?;

        info!(
            "Published transcript to {} ({} turns)",
            subject,
            message.turns.len()
        );

        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Who is speaking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// The person at the microphone
    Local,
    /// The remote voice session
    Remote,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Local => write!(f, "local"),
            Channel::Remote => write!(f, "remote"),
        }
    }
}

/// One committed turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Position in the conversation, starting at 0
    pub sequence: u64,
    pub channel: Channel,
    pub text: String,
}

/// Append-only ordered list of committed turns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTranscript {
    turns: Vec<TurnRecord>,
}

impl ConversationTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, channel: Channel, text: String) -> &TurnRecord {
        let sequence = self.turns.len() as u64;
        self.turns.push(TurnRecord {
            sequence,
            channel,
            text,
        });
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[TurnRecord] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Plain-text rendering, one "speaker: text" line per turn
    pub fn to_text(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("{}: {}", turn.channel, turn.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Committed turns plus whatever partial text is still accumulating
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveTranscript {
    pub turns: Vec<TurnRecord>,
    pub pending_local: String,
    pub pending_remote: String,
}

/// Per-channel accumulators feeding the conversation transcript
///
/// When both channels hold text at a turn boundary the local turn is
/// committed before the remote one: the local speaker's utterance is what
/// the remote reply answers.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    local: String,
    remote: String,
    transcript: ConversationTranscript,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate a streamed delta onto the channel's accumulator
    pub fn append_fragment(&mut self, channel: Channel, delta: &str) {
        match channel {
            Channel::Local => self.local.push_str(delta),
            Channel::Remote => self.remote.push_str(delta),
        }
    }

    /// Commit non-empty accumulators (local first, then remote) and clear both
    ///
    /// Returns the records appended by this call.
    pub fn on_turn_complete(&mut self) -> Vec<TurnRecord> {
        let mut committed = Vec::new();

        for channel in [Channel::Local, Channel::Remote] {
            let text = match channel {
                Channel::Local => std::mem::take(&mut self.local),
                Channel::Remote => std::mem::take(&mut self.remote),
            };
            if text.is_empty() {
                continue;
            }
            let record = self.transcript.push(channel, text);
            debug!("Committed {} turn #{}", record.channel, record.sequence);
            committed.push(record.clone());
        }

        committed
    }

    /// Salvage partial text before teardown; same ordering as a turn boundary
    pub fn flush(&mut self) -> Vec<TurnRecord> {
        self.on_turn_complete()
    }

    /// Drop partial text without committing it
    pub fn discard_pending(&mut self) {
        self.local.clear();
        self.remote.clear();
    }

    pub fn pending(&self, channel: Channel) -> &str {
        match channel {
            Channel::Local => &self.local,
            Channel::Remote => &self.remote,
        }
    }

    pub fn transcript(&self) -> &ConversationTranscript {
        &self.transcript
    }

    pub fn live(&self) -> LiveTranscript {
        LiveTranscript {
            turns: self.transcript.turns().to_vec(),
            pending_local: self.local.clone(),
            pending_remote: self.remote.clone(),
        }
    }
}

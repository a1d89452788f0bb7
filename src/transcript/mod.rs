//! Turn-by-turn conversation transcript
//!
//! Streamed partial text for each speaker is concatenated in arrival order
//! and committed as a `TurnRecord` when the remote session signals a turn
//! boundary. Committed records are append-only.

mod aggregator;

pub use aggregator::{Channel, ConversationTranscript, LiveTranscript, TranscriptAggregator, TurnRecord};

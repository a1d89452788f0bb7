//! Conversation session management
//!
//! `CallEngine` conducts one live conversation at a time:
//! - opens the transport and runs the setup handshake
//! - captures microphone audio and streams it out
//! - schedules inbound audio for gapless playback
//! - aggregates streamed transcript fragments into turns
//! - derives speaking indicators on a fixed tick
//! - hands the finished transcript to post-call analysis

mod config;
mod engine;
mod handoff;
mod monitor;
mod state;

pub use config::SessionConfig;
pub use engine::{CallEngine, DefaultDevices, DeviceProvider, Scenario};
pub use handoff::{LogHandoff, NatsTranscriptPublisher, TranscriptHandoff, TranscriptMessage};
pub use monitor::{evaluate, SpeakingMonitor};
pub use state::{CallSnapshot, CallState, SpeakingState};

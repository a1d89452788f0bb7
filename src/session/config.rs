use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime settings for a call engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sample rate of outbound microphone audio (the remote session expects 16kHz)
    pub capture_sample_rate: u32,

    /// Sample rate of inbound synthesized audio
    pub playback_sample_rate: u32,

    /// Speaking-state monitor period
    pub tick_interval: Duration,

    /// RMS above which the local speaker counts as speaking
    pub speaking_threshold: f32,

    /// Commit partial turns on a graceful stop instead of discarding them (opt-in)
    pub salvage_partial_turn: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16000,
            playback_sample_rate: 24000,
            tick_interval: Duration::from_millis(100),
            speaking_threshold: 0.01,
            salvage_partial_turn: false,
        }
    }
}

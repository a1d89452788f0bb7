use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one conversation
///
/// `idle -> connecting -> active -> (analyzing) -> results`, with `error`
/// reachable from `connecting` and `active`. `results` and `error` return to
/// `idle` only through an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Connecting,
    Active,
    Analyzing,
    Results,
    Error,
}

impl CallState {
    /// A session owns devices and a connection in these states
    pub fn is_live(self) -> bool {
        matches!(self, CallState::Connecting | CallState::Active)
    }

    /// States a reset may leave from
    pub fn can_reset(self) -> bool {
        matches!(self, CallState::Idle | CallState::Results | CallState::Error)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Active => "active",
            CallState::Analyzing => "analyzing",
            CallState::Results => "results",
            CallState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Derived speaking indicators, recomputed on every monitor tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingState {
    pub local: bool,
    pub remote: bool,
}

/// Read-only view of the engine for UIs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub session_id: Option<String>,
    pub title: Option<String>,
    pub state: CallState,
    pub muted: bool,
    pub elapsed_secs: u64,
    pub speaking: SpeakingState,
    pub turns: usize,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_matches_serde() {
        for state in [
            CallState::Idle,
            CallState::Connecting,
            CallState::Active,
            CallState::Analyzing,
            CallState::Results,
            CallState::Error,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }

    #[test]
    fn test_reset_and_live_states() {
        assert!(CallState::Active.is_live());
        assert!(CallState::Connecting.is_live());
        assert!(!CallState::Results.is_live());

        assert!(CallState::Error.can_reset());
        assert!(CallState::Results.can_reset());
        assert!(!CallState::Active.can_reset());
        assert!(!CallState::Analyzing.can_reset());
    }
}

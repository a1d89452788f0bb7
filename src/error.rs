//! Error types for the voice call engine.

use thiserror::Error;

use crate::session::CallState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    // Device errors (fatal to the attempt)
    #[error("Microphone access denied: {message}")]
    DevicePermission { message: String },

    #[error("Audio device not available: {device}")]
    DeviceUnavailable { device: String },

    // Transport errors (fatal to the session)
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Timed out connecting to the voice session after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    // Caller errors
    #[error("Invalid call state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: CallState },

    // Transient errors (contained, never change lifecycle state)
    #[error("Failed to decode audio chunk: {message}")]
    Decode { message: String },

    #[error("Failed to send audio chunk: {message}")]
    Send { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CallError {
    /// Whether this error ends the session (device and transport failures).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CallError::DevicePermission { .. }
                | CallError::DeviceUnavailable { .. }
                | CallError::Transport { .. }
                | CallError::ConnectTimeout { .. }
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        CallError::Transport {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        CallError::Decode {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

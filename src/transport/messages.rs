use serde::{Deserialize, Serialize};

/// Session setup sent during the connect handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSetup {
    pub session_id: String,
    /// Optional scenario title, for the remote side's logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Persona / instruction payload, passed through untouched
    pub instructions: String,
    /// Format of outbound audio, e.g. "audio/pcm;rate=16000"
    pub input_mime: String,
    /// Sample rate the engine plays remote audio at
    pub output_sample_rate: u32,
    pub timestamp: String, // RFC3339 timestamp
}

/// Outbound microphone audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunkMessage {
    pub session_id: String,
    pub sequence: u64,
    pub mime_type: String,
    pub data: String, // Base64-encoded PCM bytes
    pub timestamp: String,
}

/// Session control notice (currently only "close")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub session_id: String,
    pub action: String,
    pub timestamp: String,
}

/// Messages received from the remote session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake reply
    SetupComplete,
    /// Synthesized speech, base64 PCM16
    Audio {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u32>,
    },
    /// Partial transcription of the local speaker
    InputTranscript { text: String },
    /// Partial transcription of the remote speaker
    OutputTranscript { text: String },
    /// Local speech barged in on remote playback
    Interrupted,
    /// Turn boundary
    TurnComplete,
    Close {
        #[serde(default)]
        reason: Option<String>,
    },
    Error { message: String },
}

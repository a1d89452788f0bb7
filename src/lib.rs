pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod playback;
pub mod session;
pub mod transcript;
pub mod transport;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource,
    CapturePipeline, WavFileBackend,
};
pub use config::Config;
pub use error::{CallError, Result};
pub use http::{create_router, AppState};
pub use playback::{NullOutputDevice, OutputDevice, PlaybackBuffer, PlaybackScheduler};
pub use session::{
    CallEngine, CallSnapshot, CallState, DefaultDevices, DeviceProvider, LogHandoff,
    NatsTranscriptPublisher, Scenario, SessionConfig, SpeakingState, TranscriptHandoff,
    TranscriptMessage,
};
pub use transcript::{Channel, ConversationTranscript, LiveTranscript, TranscriptAggregator, TurnRecord};
pub use transport::{NatsTransport, NatsTransportConfig, ServerMessage, Transport, TransportEvent};

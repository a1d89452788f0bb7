use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::audio::AudioBackendConfig;
use crate::error::CallError;
use crate::session::SessionConfig;
use crate::transport::NatsTransportConfig;

/// Service configuration
///
/// Loaded from a TOML file, then overridden by `VOICE_CALL__*` environment
/// variables (`VOICE_CALL__TRANSPORT__NATS_URL=nats://...`). Every section
/// and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub transport: TransportConfig,
    pub audio: AudioConfig,
    pub monitor: MonitorConfig,
    pub session: SessionSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-call".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub nats_url: String,
    pub subject_prefix: String,
    pub connect_timeout_ms: u64,
    pub outbound_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            subject_prefix: "voice".to_string(),
            connect_timeout_ms: 10_000,
            outbound_queue: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_len: usize,
    /// Input device name; unset picks the system default
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16000,
            playback_sample_rate: 24000,
            frame_len: 4096,
            input_device: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_ms: u64,
    pub speaking_threshold: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            speaking_threshold: 0.01,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub salvage_partial_turn: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            salvage_partial_turn: false,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VOICE_CALL").separator("__"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |message: &str| {
            Err(CallError::Config {
                message: message.to_string(),
            })
        };

        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return invalid("audio sample rates must be positive");
        }
        if self.audio.frame_len == 0 {
            return invalid("audio.frame_len must be positive");
        }
        if self.monitor.tick_ms == 0 {
            return invalid("monitor.tick_ms must be positive");
        }
        let threshold = self.monitor.speaking_threshold;
        if threshold.is_nan() || threshold < 0.0 {
            return invalid("monitor.speaking_threshold must be non-negative");
        }
        if self.transport.subject_prefix.is_empty() {
            return invalid("transport.subject_prefix must not be empty");
        }

        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            capture_sample_rate: self.audio.capture_sample_rate,
            playback_sample_rate: self.audio.playback_sample_rate,
            tick_interval: Duration::from_millis(self.monitor.tick_ms),
            speaking_threshold: self.monitor.speaking_threshold,
            salvage_partial_turn: self.session.salvage_partial_turn,
        }
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            sample_rate: self.audio.capture_sample_rate,
            frame_len: self.audio.frame_len,
            device_name: self.audio.input_device.clone(),
        }
    }

    pub fn transport_config(&self) -> NatsTransportConfig {
        NatsTransportConfig {
            subject_prefix: self.transport.subject_prefix.clone(),
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
            outbound_queue: self.transport.outbound_queue,
        }
    }
}

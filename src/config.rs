//! Manager configuration
//!
//! Everything has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! startup_fallback = "Stub"
//! buffer_frames = 512
//!
//! [default_format]
//! sample_rate = 48000
//! channels = 2
//! sample_layout = "I16Le"
//!
//! [stub]
//! amplitude = 0.0
//!
//! [log]
//! level = "debug"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::error::{Result, SoundDeviceError};
use crate::audio::types::{AudioFormat, DeviceKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Format used by sources without a negotiated one (stub, MIDI, decoder, none)
    pub default_format: AudioFormat,
    /// Kind activated at startup when no input capture device can be used
    pub startup_fallback: DeviceKind,
    /// Frames per buffer for generated and decoded PCM
    pub buffer_frames: usize,
    /// Queue depth of each subscriber channel
    pub subscriber_capacity: usize,
    /// How long a capture worker may take to open its stream
    pub capture_start_timeout_ms: u64,
    /// Client name announced to the MIDI subsystem
    pub midi_client_name: String,
    pub stub: StubConfig,
    pub log: LogConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_format: AudioFormat::default(),
            startup_fallback: DeviceKind::Stub,
            buffer_frames: 1024,
            subscriber_capacity: 64,
            capture_start_timeout_ms: 3000,
            midi_client_name: "sound-devices".to_string(),
            stub: StubConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SoundDeviceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SoundDeviceError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Clamps sizes and rates to at least 1, so a hand-built config cannot
    /// produce empty blocks or zero-length worker periods
    pub fn normalized(mut self) -> Self {
        if self.validate().is_err() {
            tracing::warn!(
                buffer_frames = self.buffer_frames,
                sample_rate = self.default_format.sample_rate,
                channels = self.default_format.channels,
                "invalid configuration, clamping to minimum values"
            );
        }
        self.buffer_frames = self.buffer_frames.max(1);
        self.subscriber_capacity = self.subscriber_capacity.max(1);
        self.default_format = self.default_format.clamped();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.default_format.sample_rate == 0 || self.default_format.channels == 0 {
            return Err(SoundDeviceError::Config(
                "default_format needs a non-zero sample rate and channel count".to_string(),
            ));
        }
        if self.buffer_frames == 0 {
            return Err(SoundDeviceError::Config("buffer_frames must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Synthetic generator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StubConfig {
    pub frequency_hz: f32,
    /// 0.0 produces silence
    pub amplitude: f32,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 440.0,
            amplitude: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub with_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_thread_ids: false,
        }
    }
}

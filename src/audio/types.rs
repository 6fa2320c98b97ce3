//! Shared audio types used by all sound sources
//!
//! This module contains platform-agnostic types for device selection and PCM routing.
//! NO backend-specific imports allowed here.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Family of a selectable sound source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeviceKind {
    /// Microphone / line input
    InputCapture,
    /// System output captured back (what-you-hear)
    Loopback,
    /// MIDI controller rendered as PCM
    Midi,
    /// File or stream decoder
    Decoder,
    /// Synthetic generator
    Stub,
    /// No device (silence). Also used as the "all kinds" filter.
    #[default]
    None,
}

impl DeviceKind {
    /// Order in which the registry enumerates kinds. The startup policy relies on it.
    pub const ENUMERATION_ORDER: [DeviceKind; 4] = [
        DeviceKind::InputCapture,
        DeviceKind::Loopback,
        DeviceKind::Midi,
        DeviceKind::Stub,
    ];

    /// True if `self`, used as a filter, selects `other`
    pub fn matches(self, other: DeviceKind) -> bool {
        self == DeviceKind::None || self == other
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InputCapture => "input",
            Self::Loopback => "loopback",
            Self::Midi => "midi",
            Self::Decoder => "decoder",
            Self::Stub => "stub",
            Self::None => "none",
        };
        f.write_str(label)
    }
}

/// Backend-specific identifier carried by a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeviceId {
    #[default]
    None,
    /// Raw OS device name (input capture, loopback)
    Name(String),
    /// MIDI input port
    MidiPort { index: usize, name: String },
    /// Decoder source: locator (file path) + start offset in milliseconds
    Source { locator: String, start_ms: i64 },
}

/// Immutable value naming a selectable device
///
/// Two descriptors are equal iff kind, name and id all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DeviceDescriptor {
    kind: DeviceKind,
    name: String,
    id: DeviceId,
}

impl DeviceDescriptor {
    pub fn new(kind: DeviceKind, name: impl Into<String>, id: DeviceId) -> Self {
        Self {
            kind,
            name: name.into(),
            id,
        }
    }

    /// The invalid descriptor (kind `None`)
    pub fn none() -> Self {
        Self::default()
    }

    pub fn input_capture(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(DeviceKind::InputCapture, name.clone(), DeviceId::Name(name))
    }

    pub fn loopback(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(DeviceKind::Loopback, name.clone(), DeviceId::Name(name))
    }

    pub fn midi(index: usize, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            DeviceKind::Midi,
            name.clone(),
            DeviceId::MidiPort { index, name },
        )
    }

    /// Decoder descriptor. The display name is the locator itself.
    pub fn decoder(locator: impl Into<String>, start_ms: i64) -> Self {
        let locator = locator.into();
        Self::new(
            DeviceKind::Decoder,
            locator.clone(),
            DeviceId::Source { locator, start_ms },
        )
    }

    pub fn stub(name: impl Into<String>) -> Self {
        Self::new(DeviceKind::Stub, name, DeviceId::None)
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// A descriptor is valid iff its kind is not `None`
    pub fn is_valid(&self) -> bool {
        self.kind != DeviceKind::None
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.name)
    }
}

/// Byte layout of the PCM delivered to subscribers (always interleaved)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SampleLayout {
    #[default]
    F32Le,
    I16Le,
}

impl SampleLayout {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::F32Le => 4,
            Self::I16Le => 2,
        }
    }

    /// Appends normalized f32 samples to `out` in this layout
    pub fn encode(self, samples: &[f32], out: &mut Vec<u8>) {
        out.reserve(samples.len() * self.bytes_per_sample());
        match self {
            Self::F32Le => {
                for sample in samples {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
            }
            Self::I16Le => {
                for sample in samples {
                    let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
    }

    /// Decodes bytes in this layout back into f32 samples
    pub fn decode(self, data: &[u8]) -> Vec<f32> {
        match self {
            Self::F32Le => data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            Self::I16Le => data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
                .collect(),
        }
    }
}

/// PCM format in effect for the active source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(default)]
    pub sample_layout: SampleLayout,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_layout: SampleLayout) -> Self {
        Self {
            sample_rate,
            channels,
            sample_layout,
        }
    }

    /// Same format with rate and channel count raised to at least 1
    pub fn clamped(self) -> Self {
        Self {
            sample_rate: self.sample_rate.max(1),
            channels: self.channels.max(1),
            ..self
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(44100, 2, SampleLayout::F32Le)
    }
}

/// One block of interleaved PCM produced by the active source
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    /// Kind of the source that produced it (stale buffers can follow a switch)
    pub source: DeviceKind,
    pub format: AudioFormat,
    pub data: Vec<u8>,
    pub frames: usize,
    pub captured_at: Instant,
}

impl PcmBuffer {
    /// Byte length of the payload
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_f32(&self) -> Vec<f32> {
        self.format.sample_layout.decode(&self.data)
    }
}

/// Error notification for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    /// Name of the device involved, if any
    pub device: Option<String>,
    pub message: String,
}

/// Observable manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Active(DeviceKind),
    Transitioning,
}

//! Sound source abstraction layer
//!
//! This module provides a uniform interface over every kind of sound source:
//! microphone inputs, output loopback, MIDI controllers, file decoders and a
//! synthetic stub. Each source emits normalized PCM through an [`EventSink`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            SoundDeviceManager                │
//! │  Uses trait SoundSource, only looks at the   │
//! │  DeviceKind to pick a source                 │
//! └─────────────┬───────────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────────┐
//! │         trait SoundSource                    │
//! │  list_devices(), start(), stop()             │
//! └──┬───────────┬───────────┬───────────┬──────┘
//!    ▼           ▼           ▼           ▼
//! ┌────────┐ ┌────────┐ ┌─────────┐ ┌────────┐
//! │ cpal   │ │ midir  │ │symphonia│ │ stub   │
//! │capture │ │ (MIDI) │ │(decoder)│ │ (sine) │
//! └───┬────┘ └───┬────┘ └────┬────┘ └───┬────┘
//!     └──────────┴─── EventSink ────────┘
//!                        │
//!                        ▼
//!                   SignalHub ──► subscribers
//! ```

pub mod backend;
pub mod capture;
pub mod error;
pub mod signal;
pub mod stub;
pub mod types;
pub(crate) mod worker;

#[cfg(feature = "midi")]
pub mod midi;

// Re-exports for convenience
pub use backend::{create_sources, SoundSource};
pub use error::{Result, SoundDeviceError};
pub use signal::{EventSink, SignalHub};
pub use types::*;

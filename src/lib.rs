//! Sound device selection for audio/MIDI visualizers
//!
//! [`SoundDeviceManager`] enumerates the available sound sources, keeps
//! exactly one of them running and relays its PCM, errors and priority
//! changes to subscribers.
//!
//! ```no_run
//! use sound_devices::{DeviceKind, ManagerConfig, SoundDeviceManager};
//!
//! let manager = SoundDeviceManager::new(ManagerConfig::default());
//! let buffers = manager.subscribe_buffers();
//!
//! if let Some(device) = manager.list_devices(DeviceKind::Loopback).first() {
//!     manager.select(device).ok();
//! }
//! let buffer = buffers.recv().ok();
//! ```

// === SOUND DEVICE MODULES ===
pub mod audio;
pub mod audio_decoder;
pub mod config;
pub mod device_manager;
pub mod logging;
pub mod registry;
pub mod resampler;

#[cfg(test)]
mod testing;

pub use audio::{
    AudioFormat, DeviceDescriptor, DeviceId, DeviceKind, ErrorEvent, EventSink, ManagerState,
    PcmBuffer, Result, SampleLayout, SoundDeviceError, SoundSource,
};
pub use config::{LogConfig, LogLevel, ManagerConfig, StubConfig};
pub use device_manager::{ActivationHook, Selection, SoundDeviceManager};
pub use registry::DeviceRegistry;

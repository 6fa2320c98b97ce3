//! Sound source abstraction layer
//!
//! This trait defines the capability set every sound source exposes to the manager.
//! The manager treats all sources polymorphically through it and only looks at
//! `DeviceKind` to pick which source handles a descriptor.
//!
//! # Important
//!
//! This file must NOT contain any backend-specific imports (cpal, midir, symphonia...).
//! All backend code goes in the implementation files.
//!
//! # Example
//!
//! ```ignore
//! let mut source = StubSource::new(&config);
//!
//! let device = DeviceDescriptor::stub("Stub");
//! let format = source.start(&device, hub.sink(DeviceKind::Stub, device.name()))?;
//! assert!(source.is_active());
//!
//! source.stop();
//! source.stop(); // no-op
//! ```

use crate::audio::error::Result;
use crate::audio::signal::EventSink;
use crate::audio::types::*;
use crate::config::ManagerConfig;

/// Core sound source trait
///
/// Implementations emit normalized PCM and runtime errors through the
/// [`EventSink`] received in `start()`, usually from their own thread.
pub trait SoundSource: Send {
    /// Kind of descriptors this source handles
    fn kind(&self) -> DeviceKind;

    /// Backend name for logs (e.g., "cpal-input", "symphonia")
    fn name(&self) -> &'static str;

    /// Enumerate currently available devices (best-effort snapshot)
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Start producing PCM for `device`
    ///
    /// Returns the format the source delivers. On error nothing may be left running.
    fn start(&mut self, device: &DeviceDescriptor, sink: EventSink) -> Result<AudioFormat>;

    /// Stop producing PCM and release OS resources
    ///
    /// Idempotent: stopping a stopped source is a no-op. Never fails.
    fn stop(&mut self);

    /// True between a successful `start()` and the next `stop()`
    fn is_active(&self) -> bool;
}

/// Factory function to create the sources enabled at compile time
///
/// Order follows the registry's enumeration order; the decoder comes last
/// since it does not enumerate devices.
pub fn create_sources(config: &ManagerConfig) -> Vec<Box<dyn SoundSource>> {
    let mut sources: Vec<Box<dyn SoundSource>> = Vec::new();

    sources.push(Box::new(crate::audio::capture::CaptureSource::input(config)));

    #[cfg(feature = "loopback")]
    sources.push(Box::new(crate::audio::capture::CaptureSource::loopback(config)));

    #[cfg(feature = "midi")]
    sources.push(Box::new(crate::audio::midi::MidiSource::new(config)));

    sources.push(Box::new(crate::audio::stub::StubSource::new(config)));
    sources.push(Box::new(crate::audio_decoder::DecoderSource::new(config)));

    sources
}

//! In-memory sound source for tests
//!
//! `ScriptedSource` lists a fixed set of devices and records every call in a
//! shared [`Probe`], so a test keeps observing it after the source was moved
//! into a manager.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::backend::SoundSource;
use crate::audio::error::{Result, SoundDeviceError};
use crate::audio::signal::EventSink;
use crate::audio::types::*;

/// Counts sources started at the same time, across several probes
#[derive(Debug, Default)]
pub struct LiveCounter {
    live: AtomicUsize,
    overlapped: AtomicBool,
}

impl LiveCounter {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// True if two sources were ever running together
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct Probe {
    starts: AtomicUsize,
    stops: AtomicUsize,
    active: AtomicBool,
    fail_start: AtomicBool,
    vanished: AtomicBool,
    fail_enumeration: AtomicBool,
    sink: Mutex<Option<EventSink>>,
    last_started: Mutex<Option<DeviceDescriptor>>,
    counter: Mutex<Option<Arc<LiveCounter>>>,
}

impl Probe {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Makes every following `start()` fail
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Makes every following `start()` report the device as gone
    pub fn vanish(&self, gone: bool) {
        self.vanished.store(gone, Ordering::SeqCst);
    }

    /// Stops producing on its own, as a decoder does at end of stream
    pub fn finish(&self) {
        self.deactivate();
    }

    fn deactivate(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        *self.sink.lock() = None;
        if let Some(counter) = self.counter.lock().as_ref() {
            counter.live.fetch_sub(1, Ordering::SeqCst);
        }
        true
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    pub fn last_started(&self) -> Option<DeviceDescriptor> {
        self.last_started.lock().clone()
    }

    /// Sink received by the last successful `start()`
    pub fn sink(&self) -> Option<EventSink> {
        self.sink.lock().clone()
    }
}

pub struct ScriptedSource {
    kind: DeviceKind,
    devices: Vec<DeviceDescriptor>,
    format: Option<(u32, u16)>,
    probe: Arc<Probe>,
}

impl ScriptedSource {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            devices: Vec::new(),
            format: None,
            probe: Arc::new(Probe::default()),
        }
    }

    pub fn with_devices(mut self, devices: Vec<DeviceDescriptor>) -> Self {
        self.devices = devices;
        self
    }

    /// Rate and channels reported on start (default: 44100 Hz stereo)
    pub fn with_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.format = Some((sample_rate, channels));
        self
    }

    pub fn with_counter(self, counter: &Arc<LiveCounter>) -> Self {
        *self.probe.counter.lock() = Some(Arc::clone(counter));
        self
    }

    pub fn probe(&self) -> Arc<Probe> {
        Arc::clone(&self.probe)
    }
}

impl SoundSource for ScriptedSource {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        if self.probe.fail_enumeration.load(Ordering::SeqCst) {
            return Err(SoundDeviceError::Enumeration("scripted enumeration failure".to_string()));
        }
        Ok(self.devices.clone())
    }

    fn start(&mut self, device: &DeviceDescriptor, sink: EventSink) -> Result<AudioFormat> {
        self.stop();

        if self.probe.vanished.load(Ordering::SeqCst) {
            return Err(SoundDeviceError::DeviceNotFound(device.name().to_string()));
        }
        if self.probe.fail_start.load(Ordering::SeqCst) {
            return Err(SoundDeviceError::activation(device.name(), "scripted failure"));
        }

        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        self.probe.active.store(true, Ordering::SeqCst);
        *self.probe.last_started.lock() = Some(device.clone());
        if let Some(counter) = self.probe.counter.lock().as_ref() {
            if counter.live.fetch_add(1, Ordering::SeqCst) > 0 {
                counter.overlapped.store(true, Ordering::SeqCst);
            }
        }

        let (rate, channels) = self.format.unwrap_or((44100, 2));
        let format = sink.format(rate, channels);
        *self.probe.sink.lock() = Some(sink);
        Ok(format)
    }

    fn stop(&mut self) {
        if self.probe.deactivate() {
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_active(&self) -> bool {
        self.probe.is_active()
    }
}

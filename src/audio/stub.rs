//! Synthetic stub source
//!
//! Produces a sine tone (or silence) in the default format. It needs no
//! hardware, so activating it always succeeds: this is the fallback device.

use std::f32::consts::TAU;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::audio::backend::SoundSource;
use crate::audio::error::{Result, SoundDeviceError};
use crate::audio::signal::EventSink;
use crate::audio::types::*;
use crate::audio::worker::{block_period, Worker};
use crate::config::ManagerConfig;

/// Display name of the single stub entry
pub const STUB_DEVICE_NAME: &str = "Stub";

/// Phase-continuous sine oscillator writing interleaved frames
#[derive(Debug, Clone)]
pub(crate) struct Oscillator {
    phase: f32,
    step: f32,
}

impl Oscillator {
    pub(crate) fn new(frequency_hz: f32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency_hz / sample_rate.max(1) as f32,
        }
    }

    /// Adds `amplitude * sin` to every channel of `block`
    pub(crate) fn mix_into(&mut self, block: &mut [f32], channels: usize, amplitude: f32) {
        for frame in block.chunks_mut(channels.max(1)) {
            let value = self.phase.sin() * amplitude;
            for sample in frame.iter_mut() {
                *sample += value;
            }
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}

pub struct StubSource {
    format: AudioFormat,
    buffer_frames: usize,
    frequency_hz: f32,
    amplitude: f32,
    worker: Option<Worker>,
}

impl StubSource {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            format: config.default_format.clamped(),
            buffer_frames: config.buffer_frames.max(1),
            frequency_hz: config.stub.frequency_hz,
            amplitude: config.stub.amplitude.clamp(0.0, 1.0),
            worker: None,
        }
    }
}

impl SoundSource for StubSource {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Stub
    }

    fn name(&self) -> &'static str {
        "stub"
    }

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(vec![DeviceDescriptor::stub(STUB_DEVICE_NAME)])
    }

    fn start(&mut self, device: &DeviceDescriptor, sink: EventSink) -> Result<AudioFormat> {
        self.stop();

        let format = sink.format(self.format.sample_rate, self.format.channels);
        let channels = format.channels as usize;
        let block_len = self.buffer_frames * channels;
        let mut oscillator = Oscillator::new(self.frequency_hz, format.sample_rate);
        let amplitude = self.amplitude;

        let worker = Worker::spawn(
            "sound-stub",
            block_period(self.buffer_frames, format.sample_rate),
            Duration::from_secs(1),
            move || {
                let mut block = vec![0.0f32; block_len];
                Ok(move || {
                    block.fill(0.0);
                    oscillator.mix_into(&mut block, channels, amplitude);
                    sink.push_samples(&format, &block);
                    ControlFlow::Continue(())
                })
            },
        )
        .map_err(|reason| SoundDeviceError::activation(device.name(), reason))?;

        self.worker = Some(worker);
        Ok(format)
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn is_active(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }
}

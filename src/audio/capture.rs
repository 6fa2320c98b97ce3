//! cpal capture source (microphone inputs and loopback of output devices)
//!
//! The stream is opened on a worker thread (`cpal::Stream` is not `Send`).
//! The audio callback does ONLY: convert to f32 + push into a lock-free ring.
//! The worker drains the ring in `buffer_frames` blocks and relays them.
//!
//! Loopback builds an input stream on an *output* device, which cpal supports
//! on WASAPI. Hosts without that support fail the activation cleanly.

use std::ops::ControlFlow;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, StreamConfig, StreamError};
use crossbeam_channel::bounded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};

use crate::audio::backend::SoundSource;
use crate::audio::error::{Result, SoundDeviceError};
use crate::audio::signal::EventSink;
use crate::audio::types::*;
use crate::audio::worker::Worker;
use crate::config::ManagerConfig;

/// How often the worker drains the ring
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// Ring size in seconds of audio
const RING_SECONDS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureTarget {
    Input,
    #[cfg_attr(not(feature = "loopback"), allow(dead_code))]
    Loopback,
}

impl CaptureTarget {
    fn kind(self) -> DeviceKind {
        match self {
            Self::Input => DeviceKind::InputCapture,
            Self::Loopback => DeviceKind::Loopback,
        }
    }

    fn devices(self, host: &cpal::Host) -> std::result::Result<Vec<cpal::Device>, String> {
        let devices: std::result::Result<Vec<cpal::Device>, _> = match self {
            Self::Input => host.input_devices().map(|d| d.collect()),
            Self::Loopback => host.output_devices().map(|d| d.collect()),
        };
        devices.map_err(|e| format!("failed to enumerate devices: {e}"))
    }

    fn default_config(
        self,
        device: &cpal::Device,
    ) -> std::result::Result<cpal::SupportedStreamConfig, String> {
        let config = match self {
            Self::Input => device.default_input_config(),
            Self::Loopback => device.default_output_config(),
        };
        config.map_err(|e| format!("failed to read default device config: {e}"))
    }
}

/// Names of the devices the OS reports right now
fn live_device_names(target: CaptureTarget) -> std::result::Result<Vec<String>, String> {
    let host = cpal::default_host();
    Ok(target
        .devices(&host)?
        .into_iter()
        .filter_map(|device| device.name().ok())
        .collect())
}

pub struct CaptureSource {
    target: CaptureTarget,
    buffer_frames: usize,
    start_timeout: Duration,
    worker: Option<Worker>,
}

impl CaptureSource {
    /// Microphone / line inputs
    pub fn input(config: &ManagerConfig) -> Self {
        Self::with_target(CaptureTarget::Input, config)
    }

    /// Output devices captured back
    #[cfg(feature = "loopback")]
    pub fn loopback(config: &ManagerConfig) -> Self {
        Self::with_target(CaptureTarget::Loopback, config)
    }

    fn with_target(target: CaptureTarget, config: &ManagerConfig) -> Self {
        Self {
            target,
            buffer_frames: config.buffer_frames.max(1),
            start_timeout: Duration::from_millis(config.capture_start_timeout_ms),
            worker: None,
        }
    }

    fn descriptor(&self, name: String) -> DeviceDescriptor {
        match self.target {
            CaptureTarget::Input => DeviceDescriptor::input_capture(name),
            CaptureTarget::Loopback => DeviceDescriptor::loopback(name),
        }
    }
}

impl SoundSource for CaptureSource {
    fn kind(&self) -> DeviceKind {
        self.target.kind()
    }

    fn name(&self) -> &'static str {
        match self.target {
            CaptureTarget::Input => "cpal-input",
            CaptureTarget::Loopback => "cpal-loopback",
        }
    }

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let names = live_device_names(self.target).map_err(SoundDeviceError::Enumeration)?;
        Ok(names.into_iter().map(|name| self.descriptor(name)).collect())
    }

    fn start(&mut self, device: &DeviceDescriptor, sink: EventSink) -> Result<AudioFormat> {
        self.stop();

        // Re-query the OS: the cached snapshot may be stale
        let name = device.name().to_string();
        let live = live_device_names(self.target)
            .map_err(|reason| SoundDeviceError::activation(&name, reason))?;
        if !live.contains(&name) {
            return Err(SoundDeviceError::DeviceNotFound(name));
        }

        let target = self.target;
        let buffer_frames = self.buffer_frames;
        let (format_tx, format_rx) = bounded::<AudioFormat>(1);
        let device_name = name.clone();

        let worker = Worker::spawn(
            &format!("sound-{}", self.name()),
            DRAIN_INTERVAL,
            self.start_timeout,
            move || {
                let host = cpal::default_host();
                let device = target
                    .devices(&host)?
                    .into_iter()
                    .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
                    .ok_or_else(|| format!("{device_name} disappeared"))?;

                let supported = target.default_config(&device)?;
                let sample_format = supported.sample_format();
                let config: StreamConfig = supported.config();
                let format = sink.format(config.sample_rate.0, config.channels);

                let ring_capacity = ((RING_SECONDS * config.sample_rate.0 as f64) as usize
                    * config.channels as usize)
                    .max(1);
                let (producer, mut consumer) = HeapRb::<f32>::new(ring_capacity).split();

                let error_sink = sink.clone();
                let on_error = move |err: StreamError| error_sink.error(format!("stream error: {err}"));

                let stream = match sample_format {
                    SampleFormat::F32 => build_stream(&device, &config, producer, on_error, |s: f32| s)?,
                    SampleFormat::I16 => {
                        build_stream(&device, &config, producer, on_error, |s: i16| s as f32 / 32768.0)?
                    }
                    SampleFormat::U16 => build_stream(&device, &config, producer, on_error, |s: u16| {
                        (s as f32 - 32768.0) / 32768.0
                    })?,
                    other => return Err(format!("unsupported input sample format: {other:?}")),
                };
                stream
                    .play()
                    .map_err(|e| format!("failed to start capture stream: {e}"))?;

                let _ = format_tx.send(format);

                let block_len = buffer_frames * format.channels as usize;
                let mut block = vec![0.0f32; block_len];
                Ok(move || {
                    let _keep_stream_alive = &stream;
                    while consumer.occupied_len() >= block_len {
                        let n = consumer.pop_slice(&mut block);
                        sink.push_samples(&format, &block[..n]);
                    }
                    ControlFlow::Continue(())
                })
            },
        )
        .map_err(|reason| SoundDeviceError::activation(&name, reason))?;

        let format = format_rx.try_recv().map_err(|_| {
            SoundDeviceError::activation(&name, "capture worker did not report its format")
        })?;

        tracing::debug!(device = %name, rate = format.sample_rate, channels = format.channels, "capture stream open");
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

fn build_stream<T, E, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProd<f32>,
    on_error: E,
    convert: F,
) -> std::result::Result<cpal::Stream, String>
where
    T: SizedSample,
    E: FnMut(StreamError) + Send + 'static,
    F: Fn(T) -> f32 + Send + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    // Never block inside audio callbacks; a full ring drops samples
                    let _ = producer.try_push(convert(sample));
                }
            },
            on_error,
            None,
        )
        .map_err(|e| format!("failed to build capture stream: {e}"))
}

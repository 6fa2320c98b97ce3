//! Normalized signal path
//!
//! Every source publishes through an [`EventSink`] handed to it on `start()`.
//! The sink encodes samples in the configured layout and relays them to the
//! [`SignalHub`], which fans them out to subscribers.
//!
//! Relaying is fire-and-forget: the producer thread (capture callback worker,
//! decoder thread...) never blocks. A full subscriber misses the buffer, a
//! dropped subscriber is pruned on the next publish.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::audio::error::SoundDeviceError;
use crate::audio::types::{AudioFormat, DeviceKind, ErrorEvent, PcmBuffer, SampleLayout};

/// Bounded fan-out to any number of receivers
struct Fanout<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
    capacity: usize,
}

impl<T: Clone> Fanout<T> {
    fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, value: T) {
        self.subscribers.lock().retain(|tx| match tx.try_send(value.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Fan-out point for buffers, errors and priority changes
pub struct SignalHub {
    buffers: Fanout<PcmBuffer>,
    errors: Fanout<ErrorEvent>,
    priority: Fanout<bool>,
    layout: SampleLayout,
}

impl SignalHub {
    pub fn new(capacity: usize, layout: SampleLayout) -> Self {
        Self {
            buffers: Fanout::new(capacity),
            errors: Fanout::new(capacity),
            priority: Fanout::new(capacity),
            layout,
        }
    }

    pub fn subscribe_buffers(&self) -> Receiver<PcmBuffer> {
        self.buffers.subscribe()
    }

    pub fn subscribe_errors(&self) -> Receiver<ErrorEvent> {
        self.errors.subscribe()
    }

    pub fn subscribe_priority(&self) -> Receiver<bool> {
        self.priority.subscribe()
    }

    pub fn buffer_subscribers(&self) -> usize {
        self.buffers.len()
    }

    pub fn publish_buffer(&self, buffer: PcmBuffer) {
        self.buffers.publish(buffer);
    }

    pub fn publish_error(&self, event: ErrorEvent) {
        self.errors.publish(event);
    }

    /// Publishes a manager-level error
    pub fn report(&self, error: &SoundDeviceError) {
        self.publish_error(ErrorEvent {
            device: error.device().map(str::to_string),
            message: error.to_string(),
        });
    }

    pub fn publish_priority(&self, active: bool) {
        self.priority.publish(active);
    }

    /// Sink bound to one source activation
    pub fn sink(self: &Arc<Self>, source: DeviceKind, device: impl Into<String>) -> EventSink {
        EventSink {
            hub: Arc::clone(self),
            source,
            device: device.into(),
        }
    }
}

/// Handle a source uses to emit PCM and runtime errors from any thread
#[derive(Clone)]
pub struct EventSink {
    hub: Arc<SignalHub>,
    source: DeviceKind,
    device: String,
}

impl EventSink {
    pub fn source(&self) -> DeviceKind {
        self.source
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Output format for a given rate/channel count, in the hub's layout
    pub fn format(&self, sample_rate: u32, channels: u16) -> AudioFormat {
        AudioFormat::new(sample_rate, channels, self.hub.layout)
    }

    /// Encodes interleaved f32 samples and relays them to subscribers
    pub fn push_samples(&self, format: &AudioFormat, samples: &[f32]) {
        if samples.is_empty() || format.channels == 0 {
            return;
        }

        let mut data = Vec::new();
        format.sample_layout.encode(samples, &mut data);

        self.hub.publish_buffer(PcmBuffer {
            source: self.source,
            format: *format,
            data,
            frames: samples.len() / format.channels as usize,
            captured_at: Instant::now(),
        });
    }

    /// Relays a runtime failure of the source
    pub fn error(&self, message: impl Into<String>) {
        self.hub.publish_error(ErrorEvent {
            device: Some(self.device.clone()),
            message: message.into(),
        });
    }
}

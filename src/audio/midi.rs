//! MIDI controller source
//!
//! A MIDI input port is turned into PCM so the visualizers downstream see
//! something: every held note drives a sine voice scaled by its velocity.
//! The midir connection lives on the worker thread, the port callback only
//! updates the held-note table.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use midir::{Ignore, MidiInput};
use parking_lot::Mutex;

use crate::audio::backend::SoundSource;
use crate::audio::error::{Result, SoundDeviceError};
use crate::audio::signal::EventSink;
use crate::audio::stub::Oscillator;
use crate::audio::types::*;
use crate::audio::worker::{block_period, Worker};
use crate::config::ManagerConfig;

const NOTE_COUNT: usize = 128;

/// Gain of a single voice at full velocity
const VOICE_GAIN: f32 = 0.2;

/// Velocity of each held note (0 = released)
type NoteTable = [u8; NOTE_COUNT];

/// Updates the note table from one raw MIDI message
fn apply_message(notes: &mut NoteTable, message: &[u8]) {
    let [status, data1, rest @ ..] = message else {
        return;
    };
    let data2 = rest.first().copied().unwrap_or(0);
    let note = (*data1 & 0x7F) as usize;

    match status & 0xF0 {
        0x90 => notes[note] = data2 & 0x7F,
        0x80 => notes[note] = 0,
        // All Sound Off / All Notes Off
        0xB0 if *data1 == 120 || *data1 == 123 => notes.fill(0),
        _ => {}
    }
}

fn note_frequency(note: usize) -> f32 {
    440.0 * 2f32.powf((note as f32 - 69.0) / 12.0)
}

/// One oscillator per note number
struct NoteRenderer {
    voices: Vec<Oscillator>,
}

impl NoteRenderer {
    fn new(sample_rate: u32) -> Self {
        Self {
            voices: (0..NOTE_COUNT)
                .map(|note| Oscillator::new(note_frequency(note), sample_rate))
                .collect(),
        }
    }

    fn render(&mut self, notes: &NoteTable, block: &mut [f32], channels: usize) {
        block.fill(0.0);
        for (voice, &velocity) in self.voices.iter_mut().zip(notes.iter()) {
            if velocity > 0 {
                voice.mix_into(block, channels, VOICE_GAIN * velocity as f32 / 127.0);
            }
        }
        for sample in block.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

pub struct MidiSource {
    client_name: String,
    format: AudioFormat,
    buffer_frames: usize,
    start_timeout: Duration,
    worker: Option<Worker>,
}

impl MidiSource {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            client_name: config.midi_client_name.clone(),
            format: config.default_format.clamped(),
            buffer_frames: config.buffer_frames.max(1),
            start_timeout: Duration::from_millis(config.capture_start_timeout_ms),
            worker: None,
        }
    }
}

impl SoundSource for MidiSource {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Midi
    }

    fn name(&self) -> &'static str {
        "midir"
    }

    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let input = MidiInput::new(&self.client_name)
            .map_err(|e| SoundDeviceError::Enumeration(format!("MIDI client: {e}")))?;

        Ok(input
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let name = input.port_name(port).ok()?;
                Some(DeviceDescriptor::midi(index, name))
            })
            .collect())
    }

    fn start(&mut self, device: &DeviceDescriptor, sink: EventSink) -> Result<AudioFormat> {
        self.stop();

        let DeviceId::MidiPort { index, name } = device.id().clone() else {
            return Err(SoundDeviceError::activation(device.name(), "malformed MIDI port id"));
        };

        let format = sink.format(self.format.sample_rate, self.format.channels);
        let channels = format.channels as usize;
        let block_len = self.buffer_frames * channels;
        let client_name = self.client_name.clone();

        let worker = Worker::spawn(
            "sound-midi",
            block_period(self.buffer_frames, format.sample_rate),
            self.start_timeout,
            move || {
                let mut input = MidiInput::new(&client_name)
                    .map_err(|e| format!("failed to open MIDI client: {e}"))?;
                input.ignore(Ignore::All);

                // Same index and name, else the first port with that name
                let ports = input.ports();
                let port = ports
                    .get(index)
                    .filter(|p| input.port_name(p).map(|n| n == name).unwrap_or(false))
                    .or_else(|| {
                        ports
                            .iter()
                            .find(|p| input.port_name(p).map(|n| n == name).unwrap_or(false))
                    })
                    .cloned()
                    .ok_or_else(|| format!("MIDI port {name} is not available"))?;

                let notes = Arc::new(Mutex::new([0u8; NOTE_COUNT]));
                let port_notes = Arc::clone(&notes);
                let connection = input
                    .connect(
                        &port,
                        &format!("{client_name}-in"),
                        move |_stamp, message, _| apply_message(&mut port_notes.lock(), message),
                        (),
                    )
                    .map_err(|e| format!("failed to connect MIDI port: {e}"))?;

                let mut renderer = NoteRenderer::new(format.sample_rate);
                let mut block = vec![0.0f32; block_len];
                Ok(move || {
                    let _keep_connection_alive = &connection;
                    let held = *notes.lock();
                    renderer.render(&held, &mut block, channels);
                    sink.push_samples(&format, &block);
                    ControlFlow::Continue(())
                })
            },
        )
        .map_err(|reason| SoundDeviceError::activation(device.name(), reason))?;

        tracing::debug!(port = %device.name(), "midi input connected");
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

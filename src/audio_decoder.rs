// === AUDIO DECODER ===
// Decodes a file with symphonia and plays it as a sound source, paced to real time.
// Architecture : [symphonia] → [f32 interleaved] → [channel map] → [Resampler?] → [EventSink]
// Output is always in the default format so downstream sees one signal path.

use std::fs::File;
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::audio::backend::SoundSource;
use crate::audio::error::{Result, SoundDeviceError};
use crate::audio::signal::EventSink;
use crate::audio::types::*;
use crate::audio::worker::{block_period, Worker};
use crate::config::ManagerConfig;
use crate::resampler::AudioResampler;

/// Consecutive read errors tolerated before giving up on a stream
const MAX_READ_ERRORS: usize = 16;

/// Source file properties as reported by symphonia
#[derive(Debug, Clone, PartialEq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: usize,
    pub total_frames: u64,
    pub duration_seconds: f64,
}

/// Open file being decoded into the target format
pub struct DecodeStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AudioInfo,
    target_channels: usize,
    resampler: Option<AudioResampler>,
    /// Samples at target rate/channels not yet handed out
    pending: Vec<f32>,
    scratch: Vec<f32>,
    finished: bool,
    read_errors: usize,
}

impl DecodeStream {
    /// Opens `path`, seeks to `start_ms` and prepares conversion to `target`
    pub fn open(path: &str, start_ms: i64, target: AudioFormat) -> std::result::Result<Self, String> {
        let path_buf = Path::new(path).to_path_buf();

        let file = File::open(&path_buf).map_err(|e| format!("Cannot open file: {}", e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path_buf.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions {
                    enable_gapless: true,
                    ..Default::default()
                },
                &MetadataOptions::default(),
            )
            .map_err(|e| format!("Failed to probe format: {}", e))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or("No audio track found")?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or("Could not determine sample rate")?;
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2);
        let total_frames = track.codec_params.n_frames.unwrap_or(0);
        let duration_seconds = if total_frames > 0 {
            total_frames as f64 / sample_rate as f64
        } else {
            0.0
        };

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| format!("Failed to create decoder: {}", e))?;

        let target_channels = target.channels as usize;
        let resampler = if sample_rate != target.sample_rate {
            Some(AudioResampler::new(sample_rate, target.sample_rate, target_channels)?)
        } else {
            None
        };

        let start_ms = start_ms.max(0);
        if start_ms > 0 {
            let seek_to = SeekTo::Time {
                time: Time::from(start_ms as f64 / 1000.0),
                track_id: Some(track_id),
            };
            if let Err(e) = format.seek(SeekMode::Coarse, seek_to) {
                tracing::warn!(path, start_ms, "initial seek failed: {}", e);
            }
        }

        let info = AudioInfo {
            sample_rate,
            channels,
            total_frames,
            duration_seconds,
        };
        tracing::debug!(
            path,
            source_rate = info.sample_rate,
            source_channels = info.channels,
            target_rate = target.sample_rate,
            target_channels,
            resampling = resampler.is_some(),
            "decoder ready"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            info,
            target_channels,
            resampler,
            pending: Vec::new(),
            scratch: Vec::with_capacity(8192),
            finished: false,
            read_errors: 0,
        })
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    /// Moves up to `len` samples into `block`
    ///
    /// Returns fewer than `len` only once the stream is exhausted. Errors are
    /// returned when the stream had to be abandoned.
    pub fn read_block(&mut self, block: &mut Vec<f32>, len: usize) -> std::result::Result<(), String> {
        let mut failure = None;
        while self.pending.len() < len && !self.finished {
            if let Err(e) = self.decode_next() {
                failure = Some(e);
                self.finished = true;
            }
        }
        if self.finished {
            if let Some(resampler) = self.resampler.as_mut() {
                resampler.flush_into(&mut self.pending);
            }
        }

        let take = len.min(self.pending.len());
        block.clear();
        block.extend(self.pending.drain(..take));

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.finished && self.pending.is_empty()
    }

    /// Decodes one packet into `pending`
    fn decode_next(&mut self) -> std::result::Result<(), String> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.finished = true;
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Ok(());
            }
            Err(e) => {
                self.read_errors += 1;
                if self.read_errors >= MAX_READ_ERRORS {
                    return Err(format!("Read error: {}", e));
                }
                return Ok(());
            }
        };
        self.read_errors = 0;

        if packet.track_id() != self.track_id {
            return Ok(());
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!("decode error, packet skipped: {}", e);
                return Ok(());
            }
        };

        self.scratch.clear();
        let source_channels = convert_to_f32_interleaved(&decoded, &mut self.scratch);
        let mapped = remap_channels(&self.scratch, source_channels, self.target_channels);

        match self.resampler.as_mut() {
            Some(resampler) => resampler.process_into(&mapped, &mut self.pending),
            None => self.pending.extend_from_slice(&mapped),
        }
        Ok(())
    }
}

/// Converts an AudioBufferRef to interleaved f32, returns its channel count
fn convert_to_f32_interleaved(decoded: &AudioBufferRef, output: &mut Vec<f32>) -> usize {
    macro_rules! interleave {
        ($buf:expr, $convert:expr) => {{
            let channels = $buf.spec().channels.count();
            let frames = $buf.frames();
            output.reserve(frames * channels);
            for frame in 0..frames {
                for ch in 0..channels {
                    output.push($convert($buf.chan(ch)[frame]));
                }
            }
            channels
        }};
    }

    match decoded {
        AudioBufferRef::F32(buf) => interleave!(buf, |s: f32| s),
        AudioBufferRef::F64(buf) => interleave!(buf, |s: f64| s as f32),
        AudioBufferRef::S16(buf) => interleave!(buf, |s: i16| s as f32 / 32768.0),
        AudioBufferRef::S24(buf) => interleave!(buf, |s: symphonia::core::sample::i24| {
            s.0 as f32 / 8388608.0
        }),
        AudioBufferRef::S32(buf) => interleave!(buf, |s: i32| s as f32 / 2147483648.0),
        AudioBufferRef::U8(buf) => interleave!(buf, |s: u8| (s as f32 - 128.0) / 128.0),
        _ => {
            tracing::warn!("unsupported decoded sample format");
            0
        }
    }
}

/// Maps interleaved frames from `from` channels to `to` channels
///
/// Down to mono averages; otherwise each output channel copies the matching
/// input channel, the last one repeating (mono → stereo duplicates).
fn remap_channels(input: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == 0 || to == 0 {
        return Vec::new();
    }
    if from == to {
        return input.to_vec();
    }

    let frames = input.len() / from;
    let mut output = Vec::with_capacity(frames * to);
    for frame in input.chunks_exact(from) {
        if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for ch in 0..to {
                output.push(frame[ch.min(from - 1)]);
            }
        }
    }
    output
}

/// Decoder sound source
pub struct DecoderSource {
    format: AudioFormat,
    buffer_frames: usize,
    worker: Option<Worker>,
}

impl DecoderSource {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            format: config.default_format.clamped(),
            buffer_frames: config.buffer_frames.max(1),
            worker: None,
        }
    }
}

impl SoundSource for DecoderSource {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Decoder
    }

    fn name(&self) -> &'static str {
        "symphonia"
    }

    /// Files are not enumerable: decoder descriptors are built by callers
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(Vec::new())
    }

    fn start(&mut self, device: &DeviceDescriptor, sink: EventSink) -> Result<AudioFormat> {
        self.stop();

        let DeviceId::Source { locator, start_ms } = device.id() else {
            return Err(SoundDeviceError::activation(device.name(), "malformed decoder source"));
        };

        let format = sink.format(self.format.sample_rate, self.format.channels);
        let mut stream = DecodeStream::open(locator, *start_ms, format)
            .map_err(|reason| SoundDeviceError::activation(device.name(), reason))?;

        let block_len = self.buffer_frames * format.channels as usize;
        let worker = Worker::spawn(
            "sound-decoder",
            block_period(self.buffer_frames, format.sample_rate),
            Duration::from_secs(1),
            move || {
                let mut block = Vec::with_capacity(block_len);
                Ok(move || {
                    if let Err(e) = stream.read_block(&mut block, block_len) {
                        sink.error(e);
                    }
                    sink.push_samples(&format, &block);
                    if stream.is_exhausted() {
                        tracing::debug!(source = %sink.source(), device = %sink.device(), "end of stream");
                        return ControlFlow::Break(());
                    }
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

// === RESAMPLER ===
// rubato (FFT) wrapper working on interleaved f32.
// Used by the decoder so decoded files come out at the default format rate.

use rubato::{FftFixedInOut, Resampler};

/// Frames per rubato chunk: latency/efficiency trade-off
const CHUNK_FRAMES: usize = 1024;

/// Interleaved-in, interleaved-out resampler
pub struct AudioResampler {
    resampler: FftFixedInOut<f32>,
    channels: usize,
    /// Deinterleaved input chunk (one Vec per channel)
    input_buffers: Vec<Vec<f32>>,
    /// Frames rubato wants per call
    chunk_size_in: usize,
    /// Interleaved samples waiting for a full chunk
    pending_samples: Vec<f32>,
    /// source_rate / target_rate
    resample_ratio: f64,
}

impl AudioResampler {
    /// # Arguments
    /// * `source_rate` - Sample rate of the decoded stream (ex: 96000)
    /// * `target_rate` - Sample rate delivered downstream (ex: 44100)
    /// * `channels` - Interleaved channel count
    pub fn new(source_rate: u32, target_rate: u32, channels: usize) -> Result<Self, String> {
        if channels == 0 {
            return Err("resampler needs at least one channel".to_string());
        }

        let resampler = FftFixedInOut::<f32>::new(
            source_rate as usize,
            target_rate as usize,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| format!("Failed to create resampler: {}", e))?;

        let chunk_size_in = resampler.input_frames_max();
        let resample_ratio = source_rate as f64 / target_rate as f64;

        tracing::debug!(
            source_rate,
            target_rate,
            channels,
            chunk_size_in,
            "resampler created"
        );

        Ok(Self {
            resampler,
            channels,
            input_buffers: vec![vec![0.0f32; chunk_size_in]; channels],
            chunk_size_in,
            pending_samples: Vec::with_capacity(chunk_size_in * channels * 2),
            resample_ratio,
        })
    }

    /// Feeds interleaved samples; appends every complete resampled chunk to `output`
    ///
    /// Input and output are interleaved: [L0, R0, L1, R1, ...]
    pub fn process_into(&mut self, input: &[f32], output: &mut Vec<f32>) {
        self.pending_samples.extend_from_slice(input);

        let samples_per_chunk = self.chunk_size_in * self.channels;

        while self.pending_samples.len() >= samples_per_chunk {
            self.deinterleave_chunk();

            match self.resampler.process(&self.input_buffers, None) {
                Ok(resampled) => {
                    let frames_out = resampled[0].len();
                    output.reserve(frames_out * self.channels);
                    for frame in 0..frames_out {
                        for channel in &resampled {
                            output.push(channel[frame]);
                        }
                    }
                }
                Err(e) => {
                    // drop the chunk rather than stall the decoder
                    tracing::warn!("resampler error: {}", e);
                }
            }

            self.pending_samples.drain(..samples_per_chunk);
        }
    }

    /// Pads the last partial chunk with silence and resamples it
    pub fn flush_into(&mut self, output: &mut Vec<f32>) {
        if self.pending_samples.is_empty() {
            return;
        }

        let samples_per_chunk = self.chunk_size_in * self.channels;
        self.pending_samples.resize(samples_per_chunk, 0.0);
        self.process_into(&[], output);
    }

    fn deinterleave_chunk(&mut self) {
        for frame in 0..self.chunk_size_in {
            for (ch, buffer) in self.input_buffers.iter_mut().enumerate() {
                buffer[frame] = self.pending_samples[frame * self.channels + ch];
            }
        }
    }

    pub fn ratio(&self) -> f64 {
        self.resample_ratio
    }

    /// True when going down in rate (ex: 96kHz → 48kHz)
    pub fn is_downsampling(&self) -> bool {
        self.resample_ratio > 1.0
    }
}

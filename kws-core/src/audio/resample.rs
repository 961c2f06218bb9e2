//! Sample-rate conversion.
//!
//! Two converters live here:
//!
//! - [`resample`] / [`resample_to_rate`]: whole-buffer linear interpolation,
//!   used on decoded files. No anti-aliasing filter is applied; the keyword
//!   classifier tolerates the small spectral artifacts this leaves near the
//!   band edges.
//! - [`RateConverter`]: a streaming rubato `FastFixedIn` resampler for the
//!   live capture thread, where the device rate (commonly 48 kHz) differs
//!   from the model rate. When the rates match it is a passthrough and no
//!   rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::buffering::samples::SampleBuffer;
use crate::error::{KwsError, Result};

/// Resample `input` to exactly `output_length` samples by linear interpolation.
///
/// Output sample `i` reads the input at position `i * len(input) / output_length`
/// and blends the two bracketing samples; the right neighbour is clamped to the
/// last input sample. An empty input or a zero output length yields an empty
/// vector.
pub fn resample(input: &[f32], output_length: usize) -> Vec<f32> {
    if input.is_empty() || output_length == 0 {
        return Vec::new();
    }

    let ratio = input.len() as f64 / output_length as f64;
    let last = input.len() - 1;

    (0..output_length)
        .map(|i| {
            let src = i as f64 * ratio;
            let i1 = (src as usize).min(last);
            let i2 = (i1 + 1).min(last);
            let frac = src - i1 as f64;
            (input[i1] as f64 * (1.0 - frac) + input[i2] as f64 * frac) as f32
        })
        .collect()
}

/// Convert a whole buffer to `target_rate`.
///
/// Returns the buffer unchanged when it is already at the target rate.
pub fn resample_to_rate(buffer: SampleBuffer, target_rate: u32) -> SampleBuffer {
    if buffer.sample_rate == target_rate || buffer.sample_rate == 0 {
        return buffer;
    }
    let out_len =
        (buffer.samples.len() as f64 * target_rate as f64 / buffer.sample_rate as f64) as usize;
    tracing::info!(
        from = buffer.sample_rate,
        to = target_rate,
        in_len = buffer.samples.len(),
        out_len,
        "resampling buffer"
    );
    SampleBuffer::new(resample(&buffer.samples, out_len), target_rate)
}

/// Converts f32 mono audio from one fixed sample rate to another, in chunks.
pub struct RateConverter {
    /// `None` when capture rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `capture_rate`: Sample rate of the incoming audio (Hz).
    /// - `target_rate`: Sample rate expected by the classifier (Hz).
    /// - `chunk_size`: Input frame count per rubato call (e.g. `960`).
    ///
    /// # Errors
    /// Returns `KwsError::AudioStream` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| KwsError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(capture_rate, target_rate, chunk_size, max_out, "live resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated until a full `chunk_size` block is available
    /// for rubato; any remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Returns `true` when capture rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

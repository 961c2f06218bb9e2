//! Audio sources: microphone capture, WAV decode, synthetic signals, plus the
//! sample-level transforms (resampling, peak normalization) applied before
//! windowing.
//!
//! # Capture constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not allocate on the steady-state path, block, or perform I/O. It
//! down-mixes to mono into a reused scratch buffer and writes into the SPSC
//! ring producer, whose `push_slice` is lock-free. Samples that do not fit are
//! counted in `overruns` and reported by the capture thread.
//!
//! `cpal::Stream` is `!Send` on most platforms, so `AudioCapture` must be
//! created and dropped on the same thread. The engine opens it inside
//! `spawn_blocking`.

pub mod normalize;
pub mod resample;
pub mod synth;
pub mod wav;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};

use crate::{
    buffering::AudioProducer,
    error::{KwsError, Result},
};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info};

/// Handle to an active microphone stream.
///
/// **Not `Send`** — create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag — set to `false` to signal the callback to no-op.
    running: Arc<AtomicBool>,
    /// Samples the callback could not fit into the ring.
    overruns: Arc<AtomicUsize>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

/// Mix interleaved frames down to mono into `out`, converting with `to_f32`.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn downmix<T: Copy>(data: &[T], channels: usize, out: &mut Vec<f32>, to_f32: impl Fn(T) -> f32) {
    let ch = channels.max(1);
    let frames = data.len() / ch;
    out.resize(frames, 0.0);
    if ch == 1 {
        for (dst, &s) in out.iter_mut().zip(data) {
            *dst = to_f32(s);
        }
        return;
    }
    for (f, dst) in out.iter_mut().enumerate() {
        let base = f * ch;
        let sum: f32 = data[base..base + ch].iter().map(|&s| to_f32(s)).sum();
        *dst = sum / ch as f32;
    }
}

#[cfg(feature = "audio-cpal")]
fn build_mono_stream<T, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
    overruns: Arc<AtomicUsize>,
    to_f32: F,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    F: Fn(T) -> f32 + Send + 'static,
{
    use crate::buffering::Producer;

    let channels = config.channels as usize;
    let mut mix_buf: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _info| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            downmix(data, channels, &mut mix_buf, &to_f32);
            let written = producer.push_slice(&mix_buf);
            if written < mix_buf.len() {
                overruns.fetch_add(mix_buf.len() - written, Ordering::Relaxed);
            }
        },
        |err| error!("audio stream error: {err}"),
        None,
    )
}

#[cfg(feature = "audio-cpal")]
impl AudioCapture {
    /// Open the system default microphone and push mono f32 samples into
    /// `producer` at the device's native rate.
    ///
    /// # Errors
    /// `KwsError::DeviceUnavailable` when no input device exists or it cannot
    /// be configured/started. Not retried: callers treat it as startup-fatal.
    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| KwsError::DeviceUnavailable("no default input device".into()))?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| KwsError::DeviceUnavailable(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let overruns = Arc::new(AtomicUsize::new(0));
        let cb_running = Arc::clone(&running);
        let cb_overruns = Arc::clone(&overruns);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_mono_stream::<f32, _>(
                &device, &config, producer, cb_running, cb_overruns, |s| s,
            ),
            SampleFormat::I16 => build_mono_stream::<i16, _>(
                &device,
                &config,
                producer,
                cb_running,
                cb_overruns,
                |s| s as f32 / 32768.0,
            ),
            SampleFormat::U8 => build_mono_stream::<u8, _>(
                &device,
                &config,
                producer,
                cb_running,
                cb_overruns,
                |s| (s as f32 - 128.0) / 128.0,
            ),
            fmt => {
                return Err(KwsError::DeviceUnavailable(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| KwsError::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| KwsError::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            overruns,
            sample_rate,
        })
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_default(_producer: AudioProducer, _running: Arc<AtomicBool>) -> Result<Self> {
        Err(KwsError::DeviceUnavailable(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

impl AudioCapture {
    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Shared overrun counter, for a reader on another thread.
    pub fn overrun_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.overruns)
    }
}

#[cfg(test)]
mod tests {
    use super::downmix;

    #[cfg(not(feature = "audio-cpal"))]
    #[test]
    fn open_without_backend_is_device_unavailable() {
        use super::AudioCapture;
        use crate::{buffering::create_audio_ring, error::KwsError};
        use std::sync::{atomic::AtomicBool, Arc};

        let (producer, _consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        assert!(matches!(
            AudioCapture::open_default(producer, running),
            Err(KwsError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn mono_passes_through_conversion() {
        let mut out = Vec::new();
        downmix(&[0i16, 16384, -16384], 1, &mut out, |s| s as f32 / 32768.0);
        assert_eq!(out, vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn stereo_frames_are_averaged() {
        let mut out = Vec::new();
        downmix(&[0.2f32, 0.4, -1.0, 1.0], 2, &mut out, |s| s);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
    }

    #[test]
    fn trailing_partial_frame_is_ignored() {
        let mut out = Vec::new();
        downmix(&[128u8, 128, 255], 2, &mut out, |s| (s as f32 - 128.0) / 128.0);
        assert_eq!(out, vec![0.0]);
    }
}

//! Synthetic test signals for the `synthetic` mode and fixture generation.

use std::f64::consts::PI;

use rand::Rng;

/// Sine tone of `frequency` Hz lasting `duration_secs`.
pub fn tone(frequency: f32, duration_secs: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let n = (duration_secs * sample_rate as f32) as usize;
    tone_samples(frequency, n, sample_rate, amplitude)
}

/// Sine tone of exactly `len` samples.
pub fn tone_samples(frequency: f32, len: usize, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            (amplitude as f64 * (2.0 * PI * frequency as f64 * t).sin()) as f32
        })
        .collect()
}

/// Uniform white noise in `[-amplitude, amplitude]` lasting `duration_secs`.
pub fn white_noise<R: Rng + ?Sized>(
    duration_secs: f32,
    sample_rate: u32,
    amplitude: f32,
    rng: &mut R,
) -> Vec<f32> {
    let n = (duration_secs * sample_rate as f32) as usize;
    noise_samples(n, amplitude, rng)
}

/// Uniform white noise of exactly `len` samples.
pub fn noise_samples<R: Rng + ?Sized>(len: usize, amplitude: f32, rng: &mut R) -> Vec<f32> {
    (0..len)
        .map(|_| amplitude * rng.gen_range(-1.0f32..=1.0))
        .collect()
}

/// Digital silence lasting `duration_secs`.
pub fn silence(duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    vec![0.0; (duration_secs * sample_rate as f32) as usize]
}

/// The three probe signals run by the synthetic mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticSignal {
    /// 440 Hz sine at amplitude 0.5.
    Sine440,
    /// Full-scale uniform white noise.
    WhiteNoise,
    Silence,
}

impl SyntheticSignal {
    pub const ALL: [SyntheticSignal; 3] = [
        SyntheticSignal::Sine440,
        SyntheticSignal::WhiteNoise,
        SyntheticSignal::Silence,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SyntheticSignal::Sine440 => "sine_wave_440hz",
            SyntheticSignal::WhiteNoise => "white_noise",
            SyntheticSignal::Silence => "silence",
        }
    }

    /// Render exactly `len` samples at `sample_rate`.
    pub fn render<R: Rng + ?Sized>(self, len: usize, sample_rate: u32, rng: &mut R) -> Vec<f32> {
        match self {
            SyntheticSignal::Sine440 => tone_samples(440.0, len, sample_rate, 0.5),
            SyntheticSignal::WhiteNoise => noise_samples(len, 1.0, rng),
            SyntheticSignal::Silence => vec![0.0; len],
        }
    }
}

//! Peak normalization.

/// Peaks below this are treated as silence and never amplified.
pub const SILENCE_EPSILON: f32 = 1e-8;

/// Default target peak used by file mode.
pub const DEFAULT_TARGET_PEAK: f32 = 0.95;

/// Largest absolute sample value, or `0.0` for an empty slice.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// Scale `buffer` so its peak absolute amplitude equals `target_peak`.
///
/// Near-silent buffers (peak < [`SILENCE_EPSILON`]) are left untouched so the
/// noise floor is not blown up into clipping. Returns the gain applied
/// (`1.0` when nothing changed).
pub fn normalize_in_place(buffer: &mut [f32], target_peak: f32) -> f32 {
    let peak = peak(buffer);
    if peak < SILENCE_EPSILON {
        return 1.0;
    }
    let gain = target_peak / peak;
    for sample in buffer.iter_mut() {
        *sample *= gain;
    }
    gain
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn all_zero_buffer_is_unchanged() {
        let mut buf = vec![0.0f32; 32];
        let gain = normalize_in_place(&mut buf, 0.95);
        assert_eq!(gain, 1.0);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn scales_every_sample_by_target_over_peak() {
        let mut buf = vec![0.1f32, -0.4, 0.2];
        let gain = normalize_in_place(&mut buf, 0.95);
        let expected = 0.95f32 / 0.4;
        assert_relative_eq!(gain, expected);
        assert_relative_eq!(buf[0], 0.1 * expected);
        assert_relative_eq!(buf[1], -0.4 * expected);
        assert_relative_eq!(buf[2], 0.2 * expected);
        assert_relative_eq!(peak(&buf), 0.95, epsilon = 1e-6);
    }

    #[test]
    fn sub_epsilon_noise_is_not_amplified() {
        let mut buf = vec![1e-9f32, -2e-9];
        normalize_in_place(&mut buf, 0.95);
        assert_eq!(buf, vec![1e-9f32, -2e-9]);
    }

    #[test]
    fn empty_buffer_has_zero_peak() {
        assert_eq!(peak(&[]), 0.0);
        let mut buf: Vec<f32> = vec![];
        assert_eq!(normalize_in_place(&mut buf, 0.95), 1.0);
    }
}

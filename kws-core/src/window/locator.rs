//! Energy-based window location.
//!
//! Ad-hoc recordings are rarely aligned to the spoken region. Seeding
//! inference at the loudest window of the clip improves recall noticeably.

/// Root-mean-square of a sample slice (`0.0` when empty).
///
/// Accumulates in f64 so long windows do not lose precision.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Start offset of the highest-RMS window among starts `0, step, 2*step, …`
/// with `start + window_len <= len(buffer)`.
///
/// The earliest start wins ties. Returns `0` when the buffer is shorter than
/// one window; length validation is the caller's job. A zero `step_len` is
/// treated as `1`.
pub fn find_best_window(buffer: &[f32], window_len: usize, step_len: usize) -> usize {
    find_best_window_with_rms(buffer, window_len, step_len).0
}

/// Like [`find_best_window`], also returning the winning window's RMS.
pub fn find_best_window_with_rms(buffer: &[f32], window_len: usize, step_len: usize) -> (usize, f32) {
    if window_len == 0 || buffer.len() < window_len {
        return (0, 0.0);
    }
    let step = step_len.max(1);

    let mut best_start = 0usize;
    let mut best_rms = -1.0f32;
    let mut start = 0usize;
    while start + window_len <= buffer.len() {
        let r = rms(&buffer[start..start + window_len]);
        if r > best_rms {
            best_rms = r;
            best_start = start;
        }
        start += step;
    }
    (best_start, best_rms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Deterministic pseudo-random buffer (LCG) for property checks.
    fn lcg_buffer(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        assert_relative_eq!(rms(&samples), 0.5, epsilon = 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn finds_loud_region() {
        let mut buf = vec![0.01f32; 64_000];
        for s in &mut buf[40_000..56_000] {
            *s = 0.8;
        }
        assert_eq!(find_best_window(&buf, 16_000, 4_000), 40_000);
    }

    #[test]
    fn short_buffer_returns_zero() {
        assert_eq!(find_best_window(&[0.5; 100], 16_000, 4_000), 0);
    }

    #[test]
    fn ties_prefer_earliest_start() {
        let buf = vec![0.3f32; 40];
        assert_eq!(find_best_window(&buf, 10, 5), 0);
    }

    #[test]
    fn all_silent_buffer_returns_zero() {
        assert_eq!(find_best_window(&[0.0; 50], 10, 5), 0);
    }

    #[test]
    fn zero_step_scans_every_sample() {
        let mut buf = vec![0.0f32; 20];
        buf[13] = 1.0;
        // windows of 3 containing index 13 start at 11, 12, 13; 11 is earliest
        assert_eq!(find_best_window(&buf, 3, 0), 11);
    }

    #[test]
    fn best_window_dominates_every_scanned_candidate() {
        for seed in [1u32, 7, 99, 2024] {
            let mut buf = lcg_buffer(5_000, seed);
            // uneven energy envelope
            for (i, s) in buf.iter_mut().enumerate() {
                *s *= ((i as f32 / 700.0).sin().abs() + 0.05).min(1.0);
            }
            let (w, step) = (800usize, 250usize);
            let (best, best_rms) = find_best_window_with_rms(&buf, w, step);
            let mut start = 0;
            while start + w <= buf.len() {
                assert!(best_rms >= rms(&buf[start..start + w]), "seed={seed} start={start}");
                start += step;
            }
            assert_eq!(best % step, 0);
            assert_relative_eq!(best_rms, rms(&buf[best..best + w]));
        }
    }
}

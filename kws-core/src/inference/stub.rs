//! `StubClassifier` — heuristic stand-in for the real keyword model.
//!
//! The real backend is linked in by the host application. The stub keeps
//! the CLI, benchmark and pipeline exercisable end-to-end with deterministic
//! output:
//!
//! | Condition | Winning label | Confidence |
//! |-----------|---------------|------------|
//! | RMS < 0.01 | `noise` | 0.88 |
//! | zero-crossing rate > 0.1 | `unknown` | 0.75 |
//! | otherwise | `noise` | 0.70 |
//!
//! The remaining mass is split evenly over the other labels, so the keyword
//! label never wins.

use crate::error::Result;
use crate::inference::{KeywordClassifier, RawScores, StageTiming};
use crate::window::rms;
use std::time::Instant;
use tracing::debug;

/// Default label set, keyword first.
pub const STUB_LABELS: [&str; 3] = ["hey_sun", "noise", "unknown"];

pub struct StubClassifier {
    labels: Vec<String>,
    window_len: usize,
    sample_rate: u32,
}

impl StubClassifier {
    pub fn new(window_len: usize, sample_rate: u32) -> Self {
        Self {
            labels: STUB_LABELS.iter().map(|s| s.to_string()).collect(),
            window_len,
            sample_rate,
        }
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new(16_000, 16_000)
    }
}

/// Fraction of adjacent sample pairs whose sign differs.
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|p| (p[0] >= 0.0) != (p[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

impl KeywordClassifier for StubClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn window_len(&self) -> usize {
        self.window_len
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn warm_up(&mut self) -> Result<()> {
        debug!("StubClassifier::warm_up — no-op");
        Ok(())
    }

    fn classify(&mut self, window: &[f32]) -> Result<RawScores> {
        let t0 = Instant::now();
        let level = rms(window);
        let zcr = zero_crossing_rate(window);
        let dsp_ms = t0.elapsed().as_secs_f64() * 1000.0;

        let (winner, confidence) = if level < 0.01 {
            ("noise", 0.88f32)
        } else if zcr > 0.1 {
            ("unknown", 0.75)
        } else {
            ("noise", 0.70)
        };

        let others = self.labels.len().saturating_sub(1).max(1) as f32;
        let rest = (1.0 - confidence) / others;
        let confidences = self
            .labels
            .iter()
            .map(|l| if l == winner { confidence } else { rest })
            .collect();

        Ok(RawScores {
            confidences,
            timing: StageTiming {
                dsp_ms,
                classification_ms: 0.0,
            },
        })
    }
}

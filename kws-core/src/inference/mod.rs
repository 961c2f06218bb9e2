//! Classifier boundary.
//!
//! Feature extraction and inference are an external collaborator. The
//! pipeline sees them only through [`KeywordClassifier`]: a fixed input length
//! `N`, a fixed ordered label set, and one confidence per label per window.
//! That keeps the core testable with scripted doubles.
//!
//! `&mut self` on `classify` lets backends keep internal state (DSP scratch
//! buffers, RNN state). Access is serialised through [`ClassifierHandle`]'s
//! `parking_lot::Mutex`.

pub mod stub;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{KwsError, Result};

/// Per-stage timing reported by the backend, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub dsp_ms: f64,
    pub classification_ms: f64,
}

/// Raw backend output: one confidence per label, in label order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawScores {
    pub confidences: Vec<f32>,
    pub timing: StageTiming,
}

/// Contract for keyword classifier backends.
pub trait KeywordClassifier: Send + 'static {
    /// Ordered label names. Fixed for the lifetime of the backend.
    fn labels(&self) -> &[String];

    /// Exact number of samples `classify` expects.
    fn window_len(&self) -> usize;

    /// Sample rate the backend was trained at (Hz).
    fn sample_rate(&self) -> u32;

    /// One-time warm-up before the first window.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be initialised.
    fn warm_up(&mut self) -> Result<()>;

    /// Score one window of exactly `window_len()` samples.
    fn classify(&mut self, window: &[f32]) -> Result<RawScores>;
}

/// Thread-safe reference-counted handle to any `KeywordClassifier`.
#[derive(Clone)]
pub struct ClassifierHandle(pub Arc<Mutex<dyn KeywordClassifier>>);

impl ClassifierHandle {
    pub fn new<C: KeywordClassifier>(classifier: C) -> Self {
        Self(Arc::new(Mutex::new(classifier)))
    }
}

impl std::fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierHandle").finish_non_exhaustive()
    }
}

/// One label with its confidence, for reports and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelScore {
    pub label: String,
    pub confidence: f32,
}

/// Validated result of one classified window.
#[derive(Debug, Clone)]
pub struct Classification {
    labels: Arc<[String]>,
    confidences: Vec<f32>,
    best: usize,
    pub timing: StageTiming,
    /// Wall-clock time spent inside the backend call.
    pub elapsed: Duration,
}

impl Classification {
    /// Index of the highest-confidence label; ties go to the lowest index.
    pub fn best_index(&self) -> usize {
        self.best
    }

    pub fn best_label(&self) -> &str {
        &self.labels[self.best]
    }

    pub fn best_confidence(&self) -> f32 {
        self.confidences[self.best]
    }

    pub fn confidence_at(&self, index: usize) -> Option<f32> {
        self.confidences.get(index).copied()
    }

    /// Confidence of `label`, if it is part of the label set.
    pub fn score(&self, label: &str) -> Option<f32> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| self.confidences[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> + '_ {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.confidences.iter().copied())
    }

    pub fn to_label_scores(&self) -> Vec<LabelScore> {
        self.iter()
            .map(|(label, confidence)| LabelScore {
                label: label.to_string(),
                confidence,
            })
            .collect()
    }
}

/// Argmax with ties broken by the lowest index.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Wraps a backend call with input/output validation and timing.
///
/// Label set and window length are read once at construction.
#[derive(Clone)]
pub struct ClassifierAdapter {
    handle: ClassifierHandle,
    labels: Arc<[String]>,
    window_len: usize,
    sample_rate: u32,
}

impl ClassifierAdapter {
    pub fn new(handle: ClassifierHandle) -> Self {
        let (labels, window_len, sample_rate) = {
            let model = handle.0.lock();
            (
                Arc::<[String]>::from(model.labels().to_vec()),
                model.window_len(),
                model.sample_rate(),
            )
        };
        Self {
            handle,
            labels,
            window_len,
            sample_rate,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn warm_up(&self) -> Result<()> {
        self.handle.0.lock().warm_up()
    }

    /// Classify one window.
    ///
    /// # Errors
    /// `KwsError::InferenceFailed` for a wrong window length, a backend error,
    /// or a malformed backend result. No partial result is ever returned.
    pub fn classify(&self, window: &[f32]) -> Result<Classification> {
        if window.len() != self.window_len {
            return Err(KwsError::InferenceFailed(format!(
                "expected {} samples, got {}",
                self.window_len,
                window.len()
            )));
        }

        let t0 = Instant::now();
        let raw = {
            let mut model = self.handle.0.lock();
            model.classify(window)
        };
        let elapsed = t0.elapsed();

        let raw = raw.map_err(|e| match e {
            KwsError::InferenceFailed(_) => e,
            other => KwsError::InferenceFailed(other.to_string()),
        })?;

        if raw.confidences.len() != self.labels.len() {
            return Err(KwsError::InferenceFailed(format!(
                "backend returned {} scores for {} labels",
                raw.confidences.len(),
                self.labels.len()
            )));
        }
        if self.labels.is_empty() {
            return Err(KwsError::InferenceFailed("label set is empty".into()));
        }
        if let Some(bad) = raw.confidences.iter().find(|c| !c.is_finite()) {
            return Err(KwsError::InferenceFailed(format!(
                "backend returned non-finite confidence {bad}"
            )));
        }

        let confidences: Vec<f32> = raw.confidences.iter().map(|c| c.clamp(0.0, 1.0)).collect();
        let best = argmax(&confidences);

        Ok(Classification {
            labels: Arc::clone(&self.labels),
            confidences,
            best,
            timing: raw.timing,
            elapsed,
        })
    }
}

/// Which confidence feeds the detection aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeywordSelector {
    /// The configured keyword label, resolved once by name.
    Label { index: usize, name: String },
    /// Degraded mode: the best label's confidence, whatever it is.
    BestLabel,
}

impl KeywordSelector {
    /// Resolve `keyword` against `labels`.
    ///
    /// # Errors
    /// `KwsError::UnknownKeywordLabel` when the label is missing and
    /// `fallback_to_best` is off.
    pub fn resolve(labels: &[String], keyword: &str, fallback_to_best: bool) -> Result<Self> {
        if let Some(index) = labels.iter().position(|l| l == keyword) {
            return Ok(Self::Label {
                index,
                name: keyword.to_string(),
            });
        }
        if fallback_to_best {
            warn!(
                keyword,
                ?labels,
                "keyword label not found — falling back to best-label confidence"
            );
            return Ok(Self::BestLabel);
        }
        Err(KwsError::UnknownKeywordLabel {
            label: keyword.to_string(),
            available: labels.to_vec(),
        })
    }

    /// Extract the score this selector tracks from a classification.
    pub fn keyword_score(&self, classification: &Classification) -> f32 {
        match self {
            Self::Label { index, .. } => classification
                .confidence_at(*index)
                .unwrap_or_else(|| classification.best_confidence()),
            Self::BestLabel => classification.best_confidence(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::BestLabel)
    }
}

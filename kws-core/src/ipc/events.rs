//! Events broadcast by [`KwsEngine`](crate::engine::KwsEngine).
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `DetectionEvent` | `subscribe_detections()` |
//! | `WindowScoreEvent` | `subscribe_windows()` |
//! | `EngineStatusEvent` | `subscribe_status()` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::{LabelScore, StageTiming};

// ---------------------------------------------------------------------------
// Detection events
// ---------------------------------------------------------------------------

/// A debounced keyword detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Keyword label that fired.
    pub keyword: String,
    /// Detector clock at the trigger, in milliseconds.
    ///
    /// Audio time in file mode, time since engine start in live mode.
    pub timestamp_ms: u64,
    /// Wall-clock time the event was produced.
    pub detected_at: DateTime<Utc>,
    /// Moving average that crossed the threshold.
    pub triggering_average: f32,
    /// Time since the previous trigger, in milliseconds.
    pub elapsed_since_last_ms: u64,
    /// Keyword confidence of the window that fired.
    pub keyword_score: f32,
    /// Start of the window that fired, in samples at the model rate.
    pub window_start: u64,
}

// ---------------------------------------------------------------------------
// Per-window events
// ---------------------------------------------------------------------------

/// One classified window, published whether or not it triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowScoreEvent {
    pub seq: u64,
    /// Window start, in samples at the model rate.
    pub window_start: u64,
    pub best_label: String,
    pub best_confidence: f32,
    pub keyword_score: f32,
    /// Moving average after this window was pushed.
    pub average: f32,
    pub scores: Vec<LabelScore>,
    pub timing: StageTiming,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created, nothing running.
    Idle,
    /// Classifier warm-up in progress.
    WarmingUp,
    /// Microphone open, windows being classified.
    Listening,
    /// Capture stopped; engine may be restarted.
    Stopped,
    /// Unrecoverable error, restart required.
    Error,
}

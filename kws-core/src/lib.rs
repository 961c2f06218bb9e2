//! # kws-core
//!
//! Keyword-spotting engine: turns per-window classifier confidences into
//! debounced "keyword detected" events.
//!
//! ## Architecture
//!
//! ```text
//! File:  WAV decode → resample → normalize → locate loudest window ─┐
//!                                                                    ▼
//! Mic:   AudioCapture → SPSC ring → capture thread ──► WindowScheduler
//!                                   (rate convert)         │
//!                                                 bounded handoff (drop oldest)
//!                                                          │
//!                                       ClassifierAdapter::classify (per window)
//!                                                          │
//!                                  DetectionAggregator (moving average + cooldown)
//!                                                          │
//!                                        broadcast::Sender<DetectionEvent>
//! ```
//!
//! The audio callback never allocates on the steady-state path. All heap work
//! happens on the capture and classification threads.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod detect;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ipc;
pub mod window;

// Convenience re-exports for downstream crates
pub use buffering::samples::SampleBuffer;
pub use detect::{DetectionAggregator, DetectorConfig, DetectorState, Step, Trigger};
pub use engine::{
    pipeline::{DiagnosticsSnapshot, FileReport, WindowReport},
    EngineConfig, KwsEngine, SignalReport, SyntheticReport,
};
pub use error::{KwsError, Result};
pub use inference::{
    stub::StubClassifier, Classification, ClassifierAdapter, ClassifierHandle, KeywordClassifier,
    KeywordSelector, RawScores, StageTiming,
};
pub use ipc::events::{DetectionEvent, EngineStatus, EngineStatusEvent, WindowScoreEvent};

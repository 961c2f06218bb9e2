//! Temporal aggregation of per-window keyword scores into debounced
//! detection triggers.
//!
//! ## Transition (per classified window)
//!
//! ```text
//! 1. push keyword_score into the history (evict oldest past agg_windows)
//! 2. avg     = sum(history) / len(history)
//! 3. elapsed = now - last_trigger          ("cooldown elapsed" before the first trigger)
//! 4. trigger iff len(history) >= min_history
//!             && avg >= avg_threshold && elapsed >= cooldown
//!    → last_trigger = now
//! ```
//!
//! The detector is *armed* when `elapsed >= cooldown` and *cooling down*
//! otherwise; the state is derived, never stored. Cooldown gates the trigger
//! only. Scores keep flowing into the history either way.
//!
//! [`DetectorState::step`] is a pure `(state, score, now) -> (state, step)`
//! function. [`DetectionAggregator`] bundles it with a config and a [`Clock`]
//! for the pipeline.

pub mod clock;
pub mod history;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use history::ScoreHistory;

/// Aggregation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct DetectorConfig {
    /// Moving-average length in windows. Default: 3.
    pub agg_windows: usize,
    /// Average at or above which a trigger may fire. Default: 0.5.
    pub avg_threshold: f32,
    /// Minimum time between triggers, in milliseconds. Default: 1500.
    pub cooldown_ms: u64,
    /// Scores that must be in the history before a trigger may fire.
    /// Default: 1 (a single qualifying window can fire).
    pub min_history: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            agg_windows: 3,
            avg_threshold: 0.5,
            cooldown_ms: 1_500,
            min_history: 1,
        }
    }
}

impl DetectorConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// A fired detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    /// Clock time of the window that fired.
    pub at: Duration,
    /// Moving average that crossed the threshold.
    pub average: f32,
    /// Time since the previous trigger (or since "cooldown elapsed" for the first).
    pub elapsed_since_last: Duration,
}

/// Everything one transition observed, trigger or not.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub keyword_score: f32,
    pub average: f32,
    pub history_len: usize,
    pub elapsed_since_last: Duration,
    pub trigger: Option<Trigger>,
}

/// Mutable detector state: score history plus the last trigger time.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorState {
    history: ScoreHistory,
    /// `None` until the first trigger; treated as "cooldown already elapsed".
    last_trigger: Option<Duration>,
}

impl DetectorState {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            history: ScoreHistory::new(config.agg_windows),
            last_trigger: None,
        }
    }

    pub fn history(&self) -> &ScoreHistory {
        &self.history
    }

    pub fn last_trigger(&self) -> Option<Duration> {
        self.last_trigger
    }

    /// Time since the last trigger as of `now`.
    ///
    /// Before any trigger the cooldown counts as already elapsed.
    pub fn elapsed_since_last(&self, now: Duration, cooldown: Duration) -> Duration {
        match self.last_trigger {
            Some(t) => now.saturating_sub(t),
            None => now.saturating_add(cooldown),
        }
    }

    /// Whether a qualifying average at `now` would fire.
    pub fn is_armed(&self, now: Duration, cooldown: Duration) -> bool {
        self.elapsed_since_last(now, cooldown) >= cooldown
    }

    /// Pure transition: consume the state, return the next one.
    pub fn step(mut self, keyword_score: f32, now: Duration, config: &DetectorConfig) -> (Self, Step) {
        let step = self.apply(keyword_score, now, config);
        (self, step)
    }

    /// In-place form of [`step`](Self::step).
    pub fn apply(&mut self, keyword_score: f32, now: Duration, config: &DetectorConfig) -> Step {
        self.history.push(keyword_score);
        let average = self.history.average().unwrap_or(keyword_score);
        let cooldown = config.cooldown();
        let elapsed_since_last = self.elapsed_since_last(now, cooldown);

        let ready = self.history.len() >= config.min_history;
        let trigger = if ready && average >= config.avg_threshold && elapsed_since_last >= cooldown {
            self.last_trigger = Some(now);
            Some(Trigger {
                at: now,
                average,
                elapsed_since_last,
            })
        } else {
            None
        };

        Step {
            keyword_score,
            average,
            history_len: self.history.len(),
            elapsed_since_last,
            trigger,
        }
    }
}

/// Detector state + config + clock, owned by exactly one thread.
pub struct DetectionAggregator {
    config: DetectorConfig,
    state: DetectorState,
    clock: Box<dyn Clock>,
}

impl DetectionAggregator {
    pub fn new(config: DetectorConfig, clock: Box<dyn Clock>) -> Self {
        let state = DetectorState::new(&config);
        Self {
            config,
            state,
            clock,
        }
    }

    /// Aggregator on the monotonic wall clock.
    pub fn with_wall_clock(config: DetectorConfig) -> Self {
        Self::new(config, Box::new(MonotonicClock::new()))
    }

    /// Feed one keyword score, timestamped by the aggregator's clock.
    pub fn observe(&mut self, keyword_score: f32) -> Step {
        let now = self.clock.now();
        self.observe_at(keyword_score, now)
    }

    /// Feed one keyword score at an explicit time (e.g. audio time in file mode).
    pub fn observe_at(&mut self, keyword_score: f32, now: Duration) -> Step {
        self.state.apply(keyword_score, now, &self.config)
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

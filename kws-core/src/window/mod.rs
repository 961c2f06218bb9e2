//! Turning sample buffers into fixed-length classifier windows.
//!
//! - [`locator`] finds the most energetic window of a short recording.
//! - [`scheduler`] walks a buffer (or a live stream) at a fixed hop.
//!
//! Every window handed to the classifier has exactly `window_len` samples;
//! trailing samples that cannot fill one are dropped, never zero-padded.

pub mod locator;
pub mod scheduler;

pub use locator::{find_best_window, rms};
pub use scheduler::{schedule, schedule_from_located, seeded_start, StreamWindower, Windows};

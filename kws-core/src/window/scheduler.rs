//! Fixed-hop window scheduling.
//!
//! ## Buffers
//!
//! [`schedule`] yields `(start, &buffer[start..start + window_len])` for
//! `start = offset, offset + hop, …` while the full window fits. The iterator
//! borrows the buffer and holds no other state, so it can be recreated at will.
//!
//! File mode seeds the walk from the loudest window found by the locator, but
//! steps back by `window_len - hop_len` first so the earliest window that still
//! overlaps the located region is also classified ([`seeded_start`]).
//!
//! ## Live streams
//!
//! [`StreamWindower`] produces the same windows incrementally from sample
//! blocks of arbitrary size.

use crate::buffering::samples::AudioWindow;

/// Lazy iterator over fixed-length windows of a buffer.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    buffer: &'a [f32],
    window_len: usize,
    hop_len: usize,
    next: Option<usize>,
}

impl<'a> Iterator for Windows<'a> {
    type Item = (usize, &'a [f32]);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        let end = start.checked_add(self.window_len)?;
        if self.window_len == 0 || end > self.buffer.len() {
            self.next = None;
            return None;
        }
        // hop 0 would never advance: emit a single window.
        self.next = if self.hop_len == 0 {
            None
        } else {
            start.checked_add(self.hop_len)
        };
        Some((start, &self.buffer[start..end]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = match self.next {
            Some(start) if self.hop_len == 0 => {
                usize::from(self.window_len > 0 && start + self.window_len <= self.buffer.len())
            }
            Some(start) => window_count(self.buffer.len(), self.window_len, self.hop_len, start),
            None => 0,
        };
        (n, Some(n))
    }
}

impl ExactSizeIterator for Windows<'_> {}

/// Walk `buffer` from `start_offset` in steps of `hop_len`.
pub fn schedule(buffer: &[f32], window_len: usize, hop_len: usize, start_offset: usize) -> Windows<'_> {
    Windows {
        buffer,
        window_len,
        hop_len,
        next: Some(start_offset),
    }
}

/// Number of windows [`schedule`] yields:
/// `floor((len - start - window_len) / hop) + 1` when non-negative, else `0`.
pub fn window_count(buffer_len: usize, window_len: usize, hop_len: usize, start_offset: usize) -> usize {
    if window_len == 0 || hop_len == 0 {
        return 0;
    }
    match buffer_len
        .checked_sub(start_offset)
        .and_then(|rest| rest.checked_sub(window_len))
    {
        Some(span) => span / hop_len + 1,
        None => 0,
    }
}

/// First window start for a walk seeded at `located`.
///
/// Steps back by `window_len - hop_len` (saturating at `0`); if the result
/// cannot hold a full window it falls back to `0`.
pub fn seeded_start(located: usize, window_len: usize, hop_len: usize, buffer_len: usize) -> usize {
    let overlap = window_len.saturating_sub(hop_len);
    let start = located.saturating_sub(overlap);
    if start.saturating_add(window_len) > buffer_len {
        0
    } else {
        start
    }
}

/// Walk `buffer` starting near a located region.
///
/// A `located` offset of `0` walks from the beginning; any other offset is
/// biased backward through [`seeded_start`].
pub fn schedule_from_located(
    buffer: &[f32],
    window_len: usize,
    hop_len: usize,
    located: usize,
) -> Windows<'_> {
    let start = if located == 0 {
        0
    } else {
        seeded_start(located, window_len, hop_len, buffer.len())
    };
    schedule(buffer, window_len, hop_len, start)
}

/// Incremental windowing over a live sample stream.
///
/// Produces exactly the windows [`schedule`] would produce over the
/// concatenation of every pushed block, starting at offset `0`.
#[derive(Debug, Clone)]
pub struct StreamWindower {
    window_len: usize,
    hop_len: usize,
    buf: Vec<f32>,
    /// Stream offset of `buf[0]`.
    buf_start: u64,
    /// Incoming samples still to discard when `hop_len > window_len`.
    skip: usize,
}

impl StreamWindower {
    pub fn new(window_len: usize, hop_len: usize) -> Self {
        Self {
            window_len,
            hop_len: hop_len.max(1),
            buf: Vec::with_capacity(window_len * 2),
            buf_start: 0,
            skip: 0,
        }
    }

    /// Append a block of samples and return every window it completes.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioWindow> {
        let mut out = Vec::new();
        if self.window_len == 0 {
            return out;
        }

        let skipped = self.skip.min(samples.len());
        self.skip -= skipped;
        self.buf_start += skipped as u64;
        self.buf.extend_from_slice(&samples[skipped..]);

        while self.buf.len() >= self.window_len {
            out.push(AudioWindow::new(
                self.buf_start,
                self.buf[..self.window_len].to_vec(),
            ));
            let drained = self.hop_len.min(self.buf.len());
            self.buf.drain(..drained);
            self.buf_start += drained as u64;
            self.skip = self.hop_len - drained;
        }
        out
    }

    /// Samples buffered towards the next window.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop buffered samples and restart offsets at zero.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.buf_start = 0;
        self.skip = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn yields_full_windows_only() {
        let buf = ramp(30_000);
        let starts: Vec<usize> = schedule(&buf, 16_000, 4_000, 0).map(|(s, _)| s).collect();
        assert_eq!(starts, vec![0, 4_000, 8_000, 12_000]);
        for (s, w) in schedule(&buf, 16_000, 4_000, 0) {
            assert_eq!(w.len(), 16_000);
            assert_eq!(w[0], s as f32);
            assert!(s + 16_000 <= buf.len());
        }
    }

    #[test]
    fn count_matches_closed_form() {
        for len in [0usize, 999, 1_000, 1_001, 1_249, 1_250, 5_555] {
            for start in [0usize, 3, 250, 900] {
                let buf = vec![0.0f32; len];
                let n = schedule(&buf, 1_000, 250, start).count();
                assert_eq!(n, window_count(len, 1_000, 250, start), "len={len} start={start}");
                let expected = if len >= start + 1_000 {
                    (len - start - 1_000) / 250 + 1
                } else {
                    0
                };
                assert_eq!(n, expected, "len={len} start={start}");
            }
        }
    }

    #[test]
    fn size_hint_is_exact() {
        let buf = vec![0.0f32; 10_000];
        let mut it = schedule(&buf, 4_000, 1_000, 500);
        assert_eq!(it.len(), 6);
        it.next();
        assert_eq!(it.len(), 5);
    }

    #[test]
    fn restartable() {
        let buf = ramp(20_000);
        let a: Vec<usize> = schedule(&buf, 16_000, 4_000, 0).map(|(s, _)| s).collect();
        let b: Vec<usize> = schedule(&buf, 16_000, 4_000, 0).map(|(s, _)| s).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_hop_emits_single_window() {
        let buf = ramp(100);
        assert_eq!(schedule(&buf, 10, 0, 5).count(), 1);
    }

    #[test]
    fn seeded_start_steps_back_by_overlap() {
        // overlap = 12_000
        assert_eq!(seeded_start(20_000, 16_000, 4_000, 64_000), 8_000);
        assert_eq!(seeded_start(8_000, 16_000, 4_000, 64_000), 0);
    }

    #[test]
    fn seeded_start_falls_back_to_zero_when_window_would_overrun() {
        // start would be 38_000 but 38_000 + 16_000 > 50_000
        assert_eq!(seeded_start(50_000, 16_000, 4_000, 50_000), 0);
    }

    #[test]
    fn located_walk_covers_region_with_maximal_overlap() {
        let buf = ramp(64_000);
        let starts: Vec<usize> = schedule_from_located(&buf, 16_000, 4_000, 40_000)
            .map(|(s, _)| s)
            .collect();
        assert_eq!(starts, vec![28_000, 32_000, 36_000, 40_000, 44_000, 48_000]);
    }

    #[test]
    fn located_zero_walks_from_start() {
        let buf = ramp(24_000);
        let starts: Vec<usize> = schedule_from_located(&buf, 16_000, 4_000, 0)
            .map(|(s, _)| s)
            .collect();
        assert_eq!(starts, vec![0, 4_000, 8_000]);
    }

    #[test]
    fn stream_windower_matches_buffer_schedule() {
        let all = ramp(37_123);
        let expected: Vec<(u64, Vec<f32>)> = schedule(&all, 16_000, 4_000, 0)
            .map(|(s, w)| (s as u64, w.to_vec()))
            .collect();

        let mut windower = StreamWindower::new(16_000, 4_000);
        let mut got = Vec::new();
        for block in all.chunks(1_237) {
            for w in windower.push(block) {
                got.push((w.start, w.samples));
            }
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn stream_windower_handles_hop_longer_than_window() {
        let all = ramp(100);
        let expected: Vec<u64> = schedule(&all, 10, 25, 0).map(|(s, _)| s as u64).collect();
        let mut windower = StreamWindower::new(10, 25);
        let mut got = Vec::new();
        for block in all.chunks(7) {
            got.extend(windower.push(block).into_iter().map(|w| w.start));
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn stream_windower_reset_restarts_offsets() {
        let mut windower = StreamWindower::new(4, 2);
        assert_eq!(windower.push(&[0.0; 3]).len(), 0);
        assert_eq!(windower.buffered(), 3);
        windower.reset();
        let w = windower.push(&[1.0; 4]);
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].start, 0);
    }
}

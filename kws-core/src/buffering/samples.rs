//! Sample buffers and classifier windows.

/// An immutable run of mono PCM samples tagged with its sample rate.
///
/// Length and rate always travel together; windows handed to the classifier
/// are copies, never views that outlive the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One fixed-length classifier window copied out of a buffer or live stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    /// Offset of the first sample, counted from the start of the buffer
    /// (file mode) or of the capture session (live mode), at the model rate.
    pub start: u64,
    pub samples: Vec<f32>,
}

impl AudioWindow {
    pub fn new(start: u64, samples: Vec<f32>) -> Self {
        Self { start, samples }
    }

    /// Start time of this window in seconds at `sample_rate`.
    pub fn start_secs(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.start as f64 / sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_rate() {
        let buf = SampleBuffer::new(vec![0.0; 8_000], 16_000);
        assert!((buf.duration_secs() - 0.5).abs() < 1e-9);
        assert_eq!(buf.len(), 8_000);
        assert!(!buf.is_empty());
    }

    #[test]
    fn zero_rate_has_zero_duration() {
        let buf = SampleBuffer::new(vec![0.0; 10], 0);
        assert_eq!(buf.duration_secs(), 0.0);
        assert_eq!(AudioWindow::new(16_000, vec![]).start_secs(0), 0.0);
    }

    #[test]
    fn window_start_in_seconds() {
        let w = AudioWindow::new(4_000, vec![0.0; 16_000]);
        assert!((w.start_secs(16_000) - 0.25).abs() < 1e-9);
    }
}

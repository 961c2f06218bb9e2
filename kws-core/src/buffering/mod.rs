//! Sample buffers, the capture ring and the window handoff queue.
//!
//! The live path uses two queues:
//!
//! ```text
//! cpal callback ──SPSC ring (f32 samples)──► capture thread
//! capture thread ──bounded handoff (windows)──► classification thread
//! ```
//!
//! The ring is `ringbuf::HeapRb<f32>`, whose wait-free `push_slice` is safe to
//! call from the real-time audio callback.

pub mod handoff;
pub mod samples;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Type alias for the producer half — held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half — held by the capture thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Ring capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_round_trips_samples() {
        let (mut producer, mut consumer) = create_audio_ring();
        assert_eq!(producer.push_slice(&[0.1, 0.2, 0.3]), 3);
        let mut out = [0f32; 8];
        let n = consumer.pop_slice(&mut out);
        assert_eq!(&out[..n], &[0.1, 0.2, 0.3]);
        assert!(consumer.is_empty());
    }
}

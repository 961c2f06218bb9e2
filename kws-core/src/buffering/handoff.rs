//! Bounded window handoff between the capture thread and the classifier.
//!
//! Capacity is one or two windows. When the classifier falls behind, the
//! producer evicts the *oldest* pending window instead of blocking, so the
//! latency between speech and detection stays bounded. Every eviction is
//! reported to the caller, which counts and logs it.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::samples::AudioWindow;

/// Consumer half — held by the classification thread.
pub type WindowReceiver = Receiver<AudioWindow>;

/// What happened to a pushed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Window queued without loss.
    Queued,
    /// Queue was full: the pending window starting at `dropped_start` was
    /// evicted to make room.
    DroppedOldest { dropped_start: u64 },
}

/// Producer half — held by the capture thread.
///
/// Keeps a clone of the receiver purely to evict the oldest entry.
pub struct WindowSender {
    tx: Sender<AudioWindow>,
    evict: Receiver<AudioWindow>,
}

impl WindowSender {
    /// Push a window without ever blocking.
    pub fn push(&self, window: AudioWindow) -> PushOutcome {
        let mut pending = window;
        let mut outcome = PushOutcome::Queued;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return outcome,
                Err(TrySendError::Full(w)) => {
                    if let Ok(old) = self.evict.try_recv() {
                        outcome = PushOutcome::DroppedOldest {
                            dropped_start: old.start,
                        };
                    }
                    pending = w;
                }
                // Unreachable while `evict` is alive; treat as a drop of the new window.
                Err(TrySendError::Disconnected(w)) => {
                    return PushOutcome::DroppedOldest {
                        dropped_start: w.start,
                    }
                }
            }
        }
    }

    /// Number of windows currently waiting for the classifier.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Create a matched sender/receiver pair holding at most `capacity` windows.
pub fn window_handoff(capacity: usize) -> (WindowSender, WindowReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let evict = rx.clone();
    (WindowSender { tx, evict }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: u64) -> AudioWindow {
        AudioWindow::new(start, vec![0.0; 4])
    }

    #[test]
    fn queues_until_capacity() {
        let (tx, rx) = window_handoff(2);
        assert_eq!(tx.push(window(0)), PushOutcome::Queued);
        assert_eq!(tx.push(window(1)), PushOutcome::Queued);
        assert_eq!(tx.pending(), 2);
        assert_eq!(rx.try_recv().map(|w| w.start).ok(), Some(0));
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let (tx, rx) = window_handoff(2);
        tx.push(window(0));
        tx.push(window(1));
        assert_eq!(
            tx.push(window(2)),
            PushOutcome::DroppedOldest { dropped_start: 0 }
        );
        let starts: Vec<u64> = rx.try_iter().map(|w| w.start).collect();
        assert_eq!(starts, vec![1, 2]);
    }

    #[test]
    fn zero_capacity_is_promoted_to_one() {
        let (tx, rx) = window_handoff(0);
        tx.push(window(5));
        assert_eq!(
            tx.push(window(6)),
            PushOutcome::DroppedOldest { dropped_start: 5 }
        );
        assert_eq!(rx.try_recv().map(|w| w.start).ok(), Some(6));
    }

    #[test]
    fn dropping_sender_disconnects_consumer() {
        let (tx, rx) = window_handoff(1);
        tx.push(window(0));
        drop(tx);
        assert_eq!(rx.recv().map(|w| w.start).ok(), Some(0));
        assert!(rx.recv().is_err());
    }
}

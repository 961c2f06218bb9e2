//! Fixed-capacity FIFO of recent keyword scores.

/// Ring buffer of the most recent `capacity` scores.
///
/// Capacity is a startup constant; the buffer never grows. The average is
/// taken over the scores currently held, not over `capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreHistory {
    slots: Box<[f32]>,
    /// Index of the oldest score.
    head: usize,
    len: usize,
}

impl ScoreHistory {
    /// Create an empty history. A zero capacity is promoted to `1`.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0.0; capacity.max(1)].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Append `score`, evicting and returning the oldest entry when full.
    pub fn push(&mut self, score: f32) -> Option<f32> {
        let cap = self.slots.len();
        if self.len < cap {
            self.slots[(self.head + self.len) % cap] = score;
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head];
            self.slots[self.head] = score;
            self.head = (self.head + 1) % cap;
            Some(evicted)
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Scores from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        let cap = self.slots.len();
        (0..self.len).map(move |i| self.slots[(self.head + i) % cap])
    }

    /// Mean of the held scores; `None` when empty.
    pub fn average(&self) -> Option<f32> {
        if self.len == 0 {
            return None;
        }
        Some(self.iter().sum::<f32>() / self.len as f32)
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn length_is_min_of_pushes_and_capacity() {
        let mut h = ScoreHistory::new(3);
        for pushes in 1..=7 {
            h.push(pushes as f32);
            assert_eq!(h.len(), pushes.min(3));
            assert!(h.len() <= h.capacity());
        }
    }

    #[test]
    fn evicts_oldest_first() {
        let mut h = ScoreHistory::new(3);
        assert_eq!(h.push(1.0), None);
        assert_eq!(h.push(2.0), None);
        assert_eq!(h.push(3.0), None);
        assert_eq!(h.push(4.0), Some(1.0));
        assert_eq!(h.push(5.0), Some(2.0));
        assert_eq!(h.iter().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn average_divides_by_current_length() {
        let mut h = ScoreHistory::new(3);
        assert_eq!(h.average(), None);
        h.push(0.6);
        assert_relative_eq!(h.average().unwrap(), 0.6);
        h.push(0.2);
        assert_relative_eq!(h.average().unwrap(), 0.4);
        h.push(0.4);
        assert_relative_eq!(h.average().unwrap(), 0.4);
        h.push(1.0);
        assert_relative_eq!(h.average().unwrap(), (0.2 + 0.4 + 1.0) / 3.0);
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut h = ScoreHistory::new(0);
        h.push(0.1);
        assert_eq!(h.push(0.2), Some(0.1));
        assert_eq!(h.len(), 1);
        assert!(h.is_full());
    }

    #[test]
    fn clear_empties() {
        let mut h = ScoreHistory::new(2);
        h.push(0.5);
        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.average(), None);
    }
}

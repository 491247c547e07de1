use std::collections::VecDeque;

/// Fixed-capacity FIFO of the most recent queue-depth samples.
///
/// Once full, each push evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct MovingAverageWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl MovingAverageWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Mean of the window, or `None` until it has filled.
    pub fn average(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum as f64 / self.capacity as f64)
    }

    /// True when the window is full and every sample is zero.
    pub fn is_idle(&self) -> bool {
        self.is_full() && self.samples.iter().all(|&s| s == 0)
    }
}

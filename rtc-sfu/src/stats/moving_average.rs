use std::collections::VecDeque;

/// Mean of the last `window` samples.
#[derive(Debug, Clone)]
pub struct MovingAverageStat {
    window: usize,
    samples: VecDeque<u64>,
    sum: u64,
}

impl MovingAverageStat {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0,
        }
    }

    pub fn add(&mut self, value: u64) {
        if self.samples.len() == self.window
            && let Some(oldest) = self.samples.pop_front()
        {
            self.sum -= oldest;
        }
        self.samples.push_back(value);
        self.sum += value;
    }

    /// Mean over every stored sample, 0 when empty.
    pub fn value(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        self.sum / self.samples.len() as u64
    }

    /// Mean over the most recent `count` samples.
    pub fn value_last(&self, count: usize) -> u64 {
        let count = count.min(self.samples.len());
        if count == 0 {
            return 0;
        }
        let sum: u64 = self.samples.iter().rev().take(count).sum();
        sum / count as u64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

use crate::clock::SharedClock;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Time-bucketed rate over a sliding window.
///
/// Samples land in fixed `interval` buckets aligned to the first sample. The rate is
/// `scale * sum / window` per second, where the window is the last
/// `min(interval * intervals, elapsed)` of time. A bucket straddling the start of the
/// window contributes pro-rata, buckets without samples count as zero and the rate
/// drops to zero once a full span passes with no new sample.
#[derive(Clone)]
pub struct MovingIntervalRateStat {
    interval: Duration,
    intervals: u32,
    scale: f64,
    clock: SharedClock,
    start: Option<Instant>,
    last_sample: Option<Instant>,
    /// `(bucket index since start, sum)`, oldest first.
    buckets: VecDeque<(u64, u64)>,
}

impl fmt::Debug for MovingIntervalRateStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MovingIntervalRateStat")
            .field("interval", &self.interval)
            .field("intervals", &self.intervals)
            .field("scale", &self.scale)
            .field("buckets", &self.buckets)
            .finish()
    }
}

impl MovingIntervalRateStat {
    pub fn new(interval: Duration, intervals: u32, scale: f64, clock: SharedClock) -> Self {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };
        let intervals = intervals.max(1);
        Self {
            interval,
            intervals,
            scale,
            clock,
            start: None,
            last_sample: None,
            buckets: VecDeque::with_capacity(intervals as usize + 1),
        }
    }

    pub fn span(&self) -> Duration {
        self.interval * self.intervals
    }

    fn bucket_index(&self, start: Instant, now: Instant) -> u64 {
        (now.saturating_duration_since(start).as_nanos() / self.interval.as_nanos()) as u64
    }

    pub fn add(&mut self, value: u64) {
        let now = self.clock.now();
        let start = *self.start.get_or_insert(now);
        let index = self.bucket_index(start, now);

        match self.buckets.back_mut() {
            Some((last, sum)) if *last == index => *sum += value,
            _ => self.buckets.push_back((index, value)),
        }
        self.last_sample = Some(now);

        // one extra bucket is kept for the partial overlap at the window start
        let oldest_kept = index.saturating_sub(self.intervals as u64);
        while let Some(&(i, _)) = self.buckets.front() {
            if i >= oldest_kept {
                break;
            }
            self.buckets.pop_front();
        }
    }

    /// Rate over the full configured window.
    pub fn value(&self) -> u64 {
        self.value_over(self.span())
    }

    /// Rate over the most recent `window`.
    pub fn value_over(&self, window: Duration) -> u64 {
        let (Some(start), Some(last_sample)) = (self.start, self.last_sample) else {
            return 0;
        };
        let now = self.clock.now();
        if now.saturating_duration_since(last_sample) >= self.span() {
            return 0;
        }
        let elapsed = now.saturating_duration_since(start);
        let duration = window.min(elapsed);
        if duration.is_zero() {
            return 0;
        }
        let window_start = now - duration;

        let mut total = 0f64;
        for &(index, sum) in &self.buckets {
            let bucket_start = start + self.interval * index as u32;
            let bucket_end = bucket_start + self.interval;
            if bucket_end <= window_start {
                continue;
            }
            if bucket_start >= window_start {
                total += sum as f64;
            } else {
                let inside = (bucket_end - window_start).as_nanos() as f64;
                total += sum as f64 * inside / self.interval.as_nanos() as f64;
            }
        }

        let rate = total * 1e9 / duration.as_nanos() as f64;
        (rate * self.scale) as u64
    }
}

//! Stat primitives and the JSON-renderable [`StatNode`] tree.
//!
//! | Stat | Value |
//! |------|-------|
//! | [`CumulativeStat`] | running sum |
//! | [`StringStat`] | literal string |
//! | [`MovingAverageStat`] | mean of the last N samples |
//! | [`MovingIntervalRateStat`] | bucketed per-second rate |

mod moving_average;
mod moving_interval_rate;
mod stat_node;

pub use moving_average::MovingAverageStat;
pub use moving_interval_rate::MovingIntervalRateStat;
pub use stat_node::{StatEntry, StatNode};

/// Running sum.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CumulativeStat(pub u64);

impl CumulativeStat {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn add(&mut self, value: u64) {
        self.0 = self.0.saturating_add(value);
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StringStat(pub String);

/// Leaf value of a [`StatNode`].
#[derive(Debug, Clone)]
pub enum Stat {
    Cumulative(CumulativeStat),
    String(StringStat),
    MovingAverage(MovingAverageStat),
    MovingIntervalRate(MovingIntervalRateStat),
}

impl Stat {
    /// Numeric value, 0 for string stats.
    pub fn value(&self) -> u64 {
        match self {
            Stat::Cumulative(s) => s.value(),
            Stat::String(_) => 0,
            Stat::MovingAverage(s) => s.value(),
            Stat::MovingIntervalRate(s) => s.value(),
        }
    }

    /// Feeds a sample. String stats ignore it.
    pub fn add(&mut self, value: u64) {
        match self {
            Stat::Cumulative(s) => s.add(value),
            Stat::String(_) => {}
            Stat::MovingAverage(s) => s.add(value),
            Stat::MovingIntervalRate(s) => s.add(value),
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            Stat::String(s) => serde_json::Value::String(s.0.clone()),
            numeric => serde_json::Value::from(numeric.value()),
        }
    }
}

impl From<CumulativeStat> for Stat {
    fn from(s: CumulativeStat) -> Self {
        Stat::Cumulative(s)
    }
}

impl From<StringStat> for Stat {
    fn from(s: StringStat) -> Self {
        Stat::String(s)
    }
}

impl From<MovingAverageStat> for Stat {
    fn from(s: MovingAverageStat) -> Self {
        Stat::MovingAverage(s)
    }
}

impl From<MovingIntervalRateStat> for Stat {
    fn from(s: MovingIntervalRateStat) -> Self {
        Stat::MovingIntervalRate(s)
    }
}

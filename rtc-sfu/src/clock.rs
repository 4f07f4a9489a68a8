//! Injectable monotonic clock and the NTP fragment used by RR/SR matching.
//!
//! Every timer-driven component takes an `Arc<dyn Clock>` so tests can drive time with
//! [`SimulatedClock`] instead of sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Shared clock handle as held by components.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones of the `Arc` observe the same time, so one test can advance a clock shared by
/// several components at once.
#[derive(Debug)]
pub struct SimulatedClock {
    base: Instant,
    offset_nanos: AtomicU64,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.offset_nanos
            .fetch_add(delta.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

/// Middle 32 bits of a 64-bit NTP timestamp, as carried in the RR "last SR" field.
pub fn ntp_middle(ntp: u64) -> u32 {
    (ntp >> 16) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_clock_advances_for_all_holders() {
        let clock = Arc::new(SimulatedClock::new());
        let shared: SharedClock = clock.clone();
        let start = shared.now();

        clock.advance_ms(250);

        assert_eq!(shared.now() - start, Duration::from_millis(250));
    }

    #[test]
    fn test_ntp_middle_bits() {
        assert_eq!(ntp_middle(0x1122_3344_5566_7788), 0x3344_5566);
    }
}

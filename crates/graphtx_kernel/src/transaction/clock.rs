//! Wall clocks for transaction start times and timeouts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time in milliseconds.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn millis(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }
}

/// A manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct FakeClock {
    millis: AtomicU64,
}

impl FakeClock {
    /// Creates a clock reading `start_millis`.
    #[must_use]
    pub const fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// Moves the clock forward.
    pub fn forward(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_moves_only_when_told() {
        let clock = FakeClock::new(1_000);
        assert_eq!(clock.millis(), 1_000);
        clock.forward(Duration::from_secs(2));
        assert_eq!(clock.millis(), 3_000);
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.millis() > 1_577_836_800_000);
    }
}

//! Local time sources.
//!
//! Synchronization needs two readings of the local machine: the wall clock,
//! which may be arbitrarily wrong, and a monotonic clock used to time the
//! round trip to a provider. Both go through [`Clock`] so tests can drive
//! them by hand.

use std::time::Instant;

/// Local wall-clock and monotonic readings.
pub trait Clock: Send + Sync {
    /// Milliseconds since the UNIX epoch according to the local machine.
    fn wall_ms(&self) -> i64;

    /// A monotonic instant, only meaningful relative to another one.
    fn monotonic(&self) -> Instant;
}

/// The machine's own clocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::fake::FakeClock;
    use super::*;

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.wall_ms() > 1_577_836_800_000);
    }

    #[test]
    fn fake_clock_advances_both_readings() {
        let clock = FakeClock::new(1_000);
        let start = clock.monotonic();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.wall_ms(), 1_250);
        assert_eq!(clock.monotonic() - start, Duration::from_millis(250));
    }
}

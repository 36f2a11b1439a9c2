//! General utilities shared across the crate.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns the current Unix timestamp in microseconds, the unit all wire
/// timestamps in this protocol use.
#[must_use]
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// An injectable monotonic-microseconds clock so tests can pin time instead
/// of depending on the wall clock.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> i64;
}

/// Clock backed by [`now_micros`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_us(&self) -> i64 {
        now_micros()
    }
}

/// Convenience constructor for the default shared clock.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_micros_is_positive_and_monotonic_enough() {
        let a = now_micros();
        let b = now_micros();
        assert!(a > 0);
        assert!(b >= a);
    }

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_us(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn fixed_clock_pins_time() {
        let clock = FixedClock(42);
        assert_eq!(clock.now_us(), 42);
        assert_eq!(clock.now_us(), 42);
    }
}

//! Wall-clock sources.
//!
//! Every timestamp written to the coordination store, and every TTL
//! comparison made against one, goes through a [`Clock`]. Production code
//! uses [`SystemClock`]; tests drive a [`ManualClock`] across lease and
//! debounce boundaries without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of "now" as fractional seconds since the unix epoch.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> f64;
}

/// Clock handle shared between the store and the state layer.
pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// A clock that only moves when told to.
///
/// Stored as microseconds so it can be shared across threads without a lock.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start` seconds since the epoch.
    pub fn at(start: f64) -> Self {
        Self {
            micros: AtomicU64::new(secs_to_micros(start)),
        }
    }

    pub fn set(&self, secs: f64) {
        self.micros.store(secs_to_micros(secs), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

fn secs_to_micros(secs: f64) -> u64 {
    (secs.max(0.0) * 1_000_000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at(1000.0);
        assert_eq!(clock.now(), 1000.0);

        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now(), 1030.0);

        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), 1030.5);
    }

    #[test]
    fn manual_clock_set_overrides() {
        let clock = ManualClock::at(1000.0);
        clock.set(42.25);
        assert_eq!(clock.now(), 42.25);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800.0);
    }
}

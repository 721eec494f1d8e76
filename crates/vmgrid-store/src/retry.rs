//! The one bounded retry loop.
//!
//! Callers that need to wait for a contended resource hand this a
//! single-attempt closure. Attempts that return `Ok(None)` are retried with
//! exponential backoff until `timeout`; errors end the loop immediately.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(20),
            max: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(32) as i32);
        let delay = self.initial.mul_f64(factor);
        delay.min(self.max)
    }
}

/// Run `attempt` until it yields a value or `timeout` elapses.
///
/// Always makes at least one attempt. Returns `Ok(None)` on timeout.
pub fn retry_until<T, F>(timeout: Duration, backoff: Backoff, mut attempt: F) -> StoreResult<Option<T>>
where
    F: FnMut() -> StoreResult<Option<T>>,
{
    let started = Instant::now();
    let mut tries = 0u32;
    loop {
        if let Some(value) = attempt()? {
            return Ok(Some(value));
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Ok(None);
        }
        thread::sleep(backoff.delay(tries).min(timeout - elapsed));
        tries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn delay_grows_and_caps() {
        let backoff = Backoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(10));
        assert_eq!(backoff.delay(1), Duration::from_millis(20));
        assert_eq!(backoff.delay(2), Duration::from_millis(40));
        assert_eq!(backoff.delay(3), Duration::from_millis(50));
        assert_eq!(backoff.delay(100), Duration::from_millis(50));
    }

    #[test]
    fn succeeds_after_retries() {
        let mut calls = 0;
        let result = retry_until(Duration::from_secs(1), Backoff::default(), || {
            calls += 1;
            Ok((calls == 3).then_some("won"))
        })
        .unwrap();
        assert_eq!(result, Some("won"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn zero_timeout_tries_once() {
        let mut calls = 0;
        let result: Option<()> = retry_until(Duration::ZERO, Backoff::default(), || {
            calls += 1;
            Ok(None)
        })
        .unwrap();
        assert!(result.is_none());
        assert_eq!(calls, 1);
    }

    #[test]
    fn errors_are_not_retried() {
        let mut calls = 0;
        let result: StoreResult<Option<()>> = retry_until(Duration::from_secs(5), Backoff::default(), || {
            calls += 1;
            Err(StoreError::Read("connection refused".into()))
        });
        assert!(matches!(result, Err(StoreError::Read(_))));
        assert_eq!(calls, 1);
    }
}

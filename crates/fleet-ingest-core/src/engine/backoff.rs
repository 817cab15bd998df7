//! Delay between attempts to write the same batch.

use crate::config::BatchConfig;
use std::time::Duration;

/// Exponential backoff: `min(cap, base * 2^attempt)`.
///
/// The cap is the poll timeout, so a pending retry never delays shutdown
/// longer than a poll would.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    /// Backoff with an explicit base and cap.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Base from `retry_base_delay_ms`, capped at `poll_timeout_ms`.
    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(
            Duration::from_millis(config.retry_base_delay_ms),
            config.poll_timeout(),
        )
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(20);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay after `failures` consecutive failed writes.
    pub fn after_failures(&self, failures: u32) -> Duration {
        self.delay(failures.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_per_attempt() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(30));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_capped_at_poll_timeout() {
        let backoff = Backoff::from_config(&BatchConfig::default());
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_millis(1000));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_after_failures() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(backoff.after_failures(0), Duration::from_millis(10));
        assert_eq!(backoff.after_failures(1), Duration::from_millis(10));
        assert_eq!(backoff.after_failures(2), Duration::from_millis(20));
    }
}

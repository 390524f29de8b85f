//! Bounded retry for optimistic writes.

use std::time::Duration;

use rand::Rng;

/// How often and how patiently a lost conditional write is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff: max_backoff.max(base_backoff),
        }
    }

    /// Retry immediately, up to `max_attempts` attempts in total.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause after the `attempt`-th (1-based) lost race.
    ///
    /// Exponential in `attempt`, capped at `max_backoff`, with jitter over
    /// the upper half so that colliding writers spread out.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let ceiling = self
            .base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff);
        let nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
        if nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(nanos / 2..=nanos))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(16, Duration::from_millis(1), Duration::from_millis(50))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(8, Duration::from_millis(2), Duration::from_millis(10));

        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(1) && first <= Duration::from_millis(2));

        let third = policy.backoff(3);
        assert!(third >= Duration::from_millis(4) && third <= Duration::from_millis(8));

        for attempt in 4..40 {
            assert!(policy.backoff(attempt) <= Duration::from_millis(10));
        }
    }

    #[test]
    fn test_immediate_has_no_backoff() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff(2), Duration::ZERO);
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts(), 1);
    }
}

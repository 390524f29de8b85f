//! Time sources for limiters.
//!
//! Bucket state is shared between processes, so time is wall-clock
//! (`DateTime<Utc>`) rather than a process-local monotonic instant.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// A source of the current time.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Wait for `duration` as measured by this clock.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the system wall clock and the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A virtual clock that only moves when told to.
///
/// `sleep` advances the clock instead of waiting, so a test can drive a
/// limiter through any timeline instantly and reproducibly. Nothing is
/// woken up by an advance; it only changes what later `now` calls return.
#[derive(Debug)]
pub struct FakeClock {
    start: DateTime<Utc>,
    current: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    /// Create a fake clock frozen at the current system time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Create a fake clock frozen at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start,
            current: Mutex::new(start),
        }
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        let mut current = self.current.lock();
        *current = current.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Jump to an arbitrary instant, backwards included.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.current.lock() = instant;
    }

    /// Rewind to the instant the clock was created with.
    pub fn reset(&self) {
        *self.current.lock() = self.start;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_clock_is_frozen() {
        let clock = FakeClock::new();
        let first = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(clock.now(), first);
    }

    #[tokio::test]
    async fn test_fake_clock_sleep_advances() {
        let clock = FakeClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_millis(150)).await;
        clock.advance(Duration::from_millis(50));

        assert_eq!(clock.now() - start, TimeDelta::milliseconds(200));
    }

    #[test]
    fn test_fake_clock_reset_and_set() {
        let clock = FakeClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(10));
        clock.reset();
        assert_eq!(clock.now(), start);

        let earlier = start - TimeDelta::seconds(5);
        clock.set(earlier);
        assert_eq!(clock.now(), earlier);
    }

    #[tokio::test]
    async fn test_system_clock_moves_forward() {
        let clock = SystemClock::new();
        let before = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() > before);
    }
}

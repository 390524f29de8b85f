//! Bucket state and the refill computation.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resolution of [`Tokens`]: one token is this many units.
pub const NANOS_PER_TOKEN: u64 = 1_000_000_000;

/// A token quantity with nano-token resolution.
///
/// Refill arrives in fractions of a token, and those fractions have to
/// survive between calls or the effective rate drifts. Fixed point keeps
/// refill, comparison and wait computation exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tokens(u64);

impl Tokens {
    pub const ZERO: Tokens = Tokens(0);
    pub const ONE: Tokens = Tokens(NANOS_PER_TOKEN);

    /// The largest whole-token count that can be represented.
    pub const MAX_WHOLE: u64 = u64::MAX / NANOS_PER_TOKEN;

    /// `count` whole tokens, saturating at [`Tokens::MAX_WHOLE`].
    pub fn whole(count: u64) -> Self {
        Tokens(count.min(Self::MAX_WHOLE) * NANOS_PER_TOKEN)
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Tokens(nanos)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Whole tokens, rounded down.
    pub fn floor(&self) -> u64 {
        self.0 / NANOS_PER_TOKEN
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_TOKEN as f64
    }

    pub fn saturating_add(self, other: Tokens) -> Tokens {
        Tokens(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Tokens) -> Tokens {
        Tokens(self.0.saturating_sub(other.0))
    }

    /// Tokens generated over `elapsed` at one token per `period`, rounded down
    /// to the nano-token.
    pub fn refilled(elapsed: Duration, period: Duration) -> Tokens {
        let period = period.as_nanos().max(1);
        let produced = elapsed.as_nanos() * u128::from(NANOS_PER_TOKEN) / period;
        Tokens(u64::try_from(produced).unwrap_or(u64::MAX))
    }

    /// Time to generate this many tokens at one token per `period`, rounded
    /// up to the nanosecond so that waiting it out always suffices.
    pub fn time_to_generate(self, period: Duration) -> Duration {
        let numerator = u128::from(self.0) * period.as_nanos();
        let nanos = numerator.div_ceil(u128::from(NANOS_PER_TOKEN));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.as_f64())
    }
}

/// Persisted snapshot of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    /// Tokens currently in the bucket, fractions included.
    pub available: Tokens,
    /// When this snapshot was computed.
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub last_update: DateTime<Utc>,
}

impl BucketState {
    /// A bucket that has never been used: full, stamped `now`.
    pub fn full(capacity: Tokens, now: DateTime<Utc>) -> Self {
        Self {
            available: capacity,
            last_update: now,
        }
    }

    /// Whole tokens available, rounded down.
    pub fn available(&self) -> u64 {
        self.available.floor()
    }
}

/// Result of running one admission step against a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Decision {
    /// State to persist, whatever the outcome.
    pub next: BucketState,
    /// `None` if admitted, otherwise the time until a token is available.
    pub wait: Option<Duration>,
    /// Time credited for refill.
    pub elapsed: Duration,
    /// `last_update` was ahead of `now`.
    pub clock_skew: bool,
}

/// Refill `current` up to `now` and try to take one token.
///
/// Pure: both the locked and the optimistic write paths run exactly this.
/// A `last_update` in the future (writers with skewed clocks) credits no
/// refill and is kept as is, so stored timestamps never move backwards.
pub(crate) fn decide(
    current: &BucketState,
    now: DateTime<Utc>,
    capacity: Tokens,
    refill_period: Duration,
) -> Decision {
    let (elapsed, clock_skew) = match (now - current.last_update).to_std() {
        Ok(elapsed) => (elapsed, false),
        Err(_) => (Duration::ZERO, true),
    };

    let candidate = current
        .available
        .saturating_add(Tokens::refilled(elapsed, refill_period))
        .min(capacity);
    let last_update = now.max(current.last_update);

    if candidate >= Tokens::ONE {
        Decision {
            next: BucketState {
                available: candidate.saturating_sub(Tokens::ONE),
                last_update,
            },
            wait: None,
            elapsed,
            clock_skew,
        }
    } else {
        let deficit = Tokens::ONE.saturating_sub(candidate);
        Decision {
            next: BucketState {
                available: candidate,
                last_update,
            },
            wait: Some(deficit.time_to_generate(refill_period)),
            elapsed,
            clock_skew,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const SECOND: Duration = Duration::from_secs(1);

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000 + millis).unwrap()
    }

    #[test]
    fn test_tokens_floor_and_whole() {
        assert_eq!(Tokens::whole(3).floor(), 3);
        assert_eq!(Tokens::from_nanos(2_900_000_000).floor(), 2);
        assert_eq!(Tokens::whole(u64::MAX).floor(), Tokens::MAX_WHOLE);
    }

    #[test]
    fn test_refill_keeps_fractions() {
        let period = Duration::from_millis(100);
        assert_eq!(
            Tokens::refilled(Duration::from_millis(150), period),
            Tokens::from_nanos(1_500_000_000)
        );
        assert_eq!(
            Tokens::refilled(Duration::from_millis(50), period),
            Tokens::from_nanos(500_000_000)
        );
    }

    #[test]
    fn test_time_to_generate_rounds_up() {
        // A third of a token at 1s per token is 333_333_333.33ns.
        let third = Tokens::from_nanos(333_333_333);
        let wait = third.time_to_generate(SECOND);
        assert_eq!(wait, Duration::from_nanos(333_333_333));

        let period = Duration::from_nanos(3);
        let wait = Tokens::from_nanos(500_000_000).time_to_generate(period);
        assert_eq!(wait, Duration::from_nanos(2));
        assert!(Tokens::refilled(wait, period) >= Tokens::from_nanos(500_000_000));
    }

    #[test]
    fn test_decide_admits_from_full_bucket() {
        let state = BucketState::full(Tokens::whole(2), at(0));
        let decision = decide(&state, at(0), Tokens::whole(2), SECOND);

        assert_eq!(decision.wait, None);
        assert_eq!(decision.next.available, Tokens::whole(1));
        assert_eq!(decision.next.last_update, at(0));
    }

    #[test]
    fn test_decide_denies_and_keeps_partial_refill() {
        let state = BucketState {
            available: Tokens::ZERO,
            last_update: at(0),
        };
        let decision = decide(&state, at(400), Tokens::whole(2), SECOND);

        assert_eq!(decision.next.available, Tokens::from_nanos(400_000_000));
        assert_eq!(decision.next.last_update, at(400));
        assert_eq!(decision.wait, Some(Duration::from_millis(600)));
    }

    #[test]
    fn test_decide_caps_at_capacity() {
        let state = BucketState {
            available: Tokens::whole(1),
            last_update: at(0),
        };
        let decision = decide(&state, at(60_000), Tokens::whole(4), SECOND);

        assert_eq!(decision.wait, None);
        assert_eq!(decision.next.available, Tokens::whole(3));
    }

    #[test]
    fn test_decide_clamps_clock_skew() {
        let state = BucketState {
            available: Tokens::from_nanos(1_500_000_000),
            last_update: at(500),
        };
        let decision = decide(&state, at(0), Tokens::whole(4), SECOND);

        assert!(decision.clock_skew);
        assert_eq!(decision.elapsed, Duration::ZERO);
        assert_eq!(decision.next.available, Tokens::from_nanos(500_000_000));
        assert_eq!(decision.next.last_update, at(500));
    }

    #[test]
    fn test_state_serializes_compactly() {
        let state = BucketState {
            available: Tokens::from_nanos(1_250_000_000),
            last_update: at(0) + TimeDelta::nanoseconds(7),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(
            json,
            r#"{"available":1250000000,"last_update":1700000000000000007}"#
        );
        let back: BucketState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.available(), 1);
    }
}

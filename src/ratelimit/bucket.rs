//! Token bucket limiter over shared state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::backend::StateBackend;
use super::descriptor::BucketKey;
use super::retry::RetryPolicy;
use super::state::{decide, BucketState, Decision, Tokens};
use crate::clock::Clock;
use crate::config::BucketConfig;
use crate::error::{LimitersError, Result};
use crate::lock::Locker;

/// How a bucket serializes its read-modify-write cycle.
enum Synchronization {
    /// Hold a lock around read, compute and unconditional write.
    Locked(Arc<dyn Locker>),
    /// No lock: read, compute, conditional write, retry on a lost race.
    RaceCheck(RetryPolicy),
}

/// A token bucket rate limiter.
///
/// The limiter itself is immutable configuration. All mutable state lives in
/// the [`StateBackend`] under the bucket's key, so instances built with the
/// same key and backend in any number of tasks or processes share a single
/// bucket. Refill is computed on each call from the time elapsed since the
/// last update; nothing runs in the background.
pub struct TokenBucket {
    key: BucketKey,
    capacity: u64,
    refill_period: Duration,
    backend: Arc<dyn StateBackend>,
    clock: Arc<dyn Clock>,
    sync: Synchronization,
}

impl TokenBucket {
    /// Create a lock-assisted bucket.
    pub fn new(
        key: impl Into<BucketKey>,
        capacity: u64,
        refill_period: Duration,
        locker: Arc<dyn Locker>,
        backend: Arc<dyn StateBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::build(
            key.into(),
            capacity,
            refill_period,
            backend,
            clock,
            Synchronization::Locked(locker),
        )
    }

    /// Create a bucket that relies on the backend's conditional write instead
    /// of a lock.
    pub fn with_race_check(
        key: impl Into<BucketKey>,
        capacity: u64,
        refill_period: Duration,
        backend: Arc<dyn StateBackend>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Self::build(
            key.into(),
            capacity,
            refill_period,
            backend,
            clock,
            Synchronization::RaceCheck(retry),
        )
    }

    /// Create a bucket from configuration. `locker` is only used when the
    /// configuration does not ask for race-check mode.
    pub fn from_config(
        config: &BucketConfig,
        locker: Arc<dyn Locker>,
        backend: Arc<dyn StateBackend>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        config.validate()?;
        let sync = if config.race_check {
            Synchronization::RaceCheck(retry)
        } else {
            Synchronization::Locked(locker)
        };
        Self::build(
            BucketKey::new(config.key.clone()),
            config.capacity,
            config.refill_period(),
            backend,
            clock,
            sync,
        )
    }

    fn build(
        key: BucketKey,
        capacity: u64,
        refill_period: Duration,
        backend: Arc<dyn StateBackend>,
        clock: Arc<dyn Clock>,
        sync: Synchronization,
    ) -> Result<Self> {
        if capacity == 0 || capacity > Tokens::MAX_WHOLE {
            return Err(LimitersError::Config(format!(
                "bucket {}: capacity must be between 1 and {}",
                key,
                Tokens::MAX_WHOLE
            )));
        }
        if refill_period.is_zero() {
            return Err(LimitersError::Config(format!(
                "bucket {}: refill period must be positive",
                key
            )));
        }
        Ok(Self {
            key,
            capacity,
            refill_period,
            backend,
            clock,
            sync,
        })
    }

    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }

    /// Whether this bucket uses conditional writes instead of a lock.
    pub fn is_race_check(&self) -> bool {
        matches!(self.sync, Synchronization::RaceCheck(_))
    }

    /// Take one token.
    ///
    /// Returns `Ok(())` if the request is admitted. A denial is
    /// [`LimitersError::LimitExhausted`] carrying the time until a token will
    /// be available; the state (including partial refill) is persisted either
    /// way. Backend failures abort the call without admitting.
    pub async fn limit(&self, cancel: &CancellationToken) -> Result<()> {
        let decision = match &self.sync {
            Synchronization::Locked(locker) => {
                self.limit_locked(locker.as_ref(), cancel).await?
            }
            Synchronization::RaceCheck(retry) => self.limit_race_check(retry, cancel).await?,
        };
        self.finish(decision)
    }

    /// Current state, without consuming anything. A bucket that was never
    /// written is reported full.
    pub async fn state(&self) -> Result<BucketState> {
        let stored = self.backend.read(&self.key).await?;
        Ok(stored
            .unwrap_or_else(|| BucketState::full(self.capacity_tokens(), self.clock.now())))
    }

    fn capacity_tokens(&self) -> Tokens {
        Tokens::whole(self.capacity)
    }

    fn step(&self, current: Option<&BucketState>) -> Decision {
        let now = self.clock.now();
        let fresh;
        let current = match current {
            Some(state) => state,
            None => {
                fresh = BucketState::full(self.capacity_tokens(), now);
                &fresh
            }
        };
        let decision = decide(current, now, self.capacity_tokens(), self.refill_period);
        if decision.clock_skew {
            warn!(
                key = %self.key,
                last_update = %current.last_update,
                now = %now,
                "Stored update is ahead of local clock, no refill credited"
            );
        }
        trace!(
            key = %self.key,
            available = %current.available,
            elapsed = ?decision.elapsed,
            "Checking token bucket"
        );
        decision
    }

    async fn limit_locked(
        &self,
        locker: &dyn Locker,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        let mut guard = locker.lock(cancel).await?;

        let result = async {
            let current = self.backend.read(&self.key).await?;
            let decision = self.step(current.as_ref());
            self.backend.write(&self.key, &decision.next).await?;
            Ok::<_, LimitersError>(decision)
        }
        .await;

        let released = guard.unlock().await;
        let decision = result?;
        released?;
        Ok(decision)
    }

    async fn limit_race_check(
        &self,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        let attempts = retry.max_attempts();
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(LimitersError::Cancelled);
            }

            let current = self.backend.read(&self.key).await?;
            let decision = self.step(current.as_ref());
            if self
                .backend
                .compare_and_write(&self.key, current.as_ref(), &decision.next)
                .await?
            {
                return Ok(decision);
            }

            debug!(key = %self.key, attempt = attempt, "Lost state update race, retrying");
            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LimitersError::Cancelled),
                    _ = tokio::time::sleep(retry.backoff(attempt)) => {}
                }
            }
        }

        warn!(key = %self.key, attempts = attempts, "Giving up on contended bucket");
        Err(LimitersError::Contention { attempts })
    }

    fn finish(&self, decision: Decision) -> Result<()> {
        match decision.wait {
            None => {
                trace!(
                    key = %self.key,
                    available = %decision.next.available,
                    "Token taken"
                );
                Ok(())
            }
            Some(wait) => {
                debug!(key = %self.key, wait = ?wait, "Token bucket exhausted");
                Err(LimitersError::LimitExhausted { wait })
            }
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("key", &self.key)
            .field("capacity", &self.capacity)
            .field("refill_period", &self.refill_period)
            .field("race_check", &self.is_race_check())
            .finish()
    }
}

//! Distributed lock built on a key-value store lease record.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{LockGuard, Locker};
use crate::clock::Clock;
use crate::config::LockConfig;
use crate::error::{LimitersError, Result};
use crate::store::KeyValueStore;

/// The record stored under the lock key while the lock is held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LeaseRecord {
    owner: Uuid,
    expires_at: DateTime<Utc>,
}

/// A lock shared by every process that can reach the same store.
///
/// Acquiring writes a lease record with a conditional put. A record whose
/// `expires_at` has passed is treated as free, so a holder that dies without
/// unlocking blocks others for at most one lease TTL.
pub struct LeaseLocker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    lease_ttl: Duration,
    retry_interval: Duration,
}

impl LeaseLocker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        key: impl Into<String>,
        config: &LockConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            key: key.into(),
            lease_ttl: config.lease_ttl(),
            retry_interval: config.retry_interval(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Make one attempt at taking the lease.
    async fn try_acquire(&self, owner: Uuid) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        let current = self.store.get(&self.key).await?;

        if let Some(bytes) = &current {
            let record: LeaseRecord = serde_json::from_slice(bytes)?;
            if record.expires_at > now {
                trace!(key = %self.key, holder = %record.owner, "Lease held elsewhere");
                return Ok(None);
            }
            debug!(
                key = %self.key,
                holder = %record.owner,
                expired_at = %record.expires_at,
                "Reclaiming expired lease"
            );
        }

        let ttl = TimeDelta::from_std(self.lease_ttl).unwrap_or(TimeDelta::MAX);
        let record = LeaseRecord {
            owner,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        let encoded = serde_json::to_vec(&record)?;

        let acquired = self
            .store
            .compare_and_put(
                &self.key,
                current.as_deref(),
                encoded.clone(),
                Some(self.lease_ttl),
            )
            .await?;

        Ok(acquired.then_some(encoded))
    }
}

impl fmt::Debug for LeaseLocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseLocker")
            .field("key", &self.key)
            .field("lease_ttl", &self.lease_ttl)
            .field("retry_interval", &self.retry_interval)
            .finish()
    }
}

#[async_trait]
impl Locker for LeaseLocker {
    async fn lock(&self, cancel: &CancellationToken) -> Result<Box<dyn LockGuard>> {
        let owner = Uuid::new_v4();
        loop {
            if cancel.is_cancelled() {
                return Err(LimitersError::Cancelled);
            }
            if let Some(record) = self.try_acquire(owner).await? {
                trace!(key = %self.key, owner = %owner, "Lease acquired");
                return Ok(Box::new(LeaseGuard {
                    store: self.store.clone(),
                    key: self.key.clone(),
                    record: Some(record),
                }));
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LimitersError::Cancelled),
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }
}

struct LeaseGuard {
    store: Arc<dyn KeyValueStore>,
    key: String,
    /// Encoded record we wrote; `None` once released.
    record: Option<Vec<u8>>,
}

#[async_trait]
impl LockGuard for LeaseGuard {
    async fn unlock(&mut self) -> Result<()> {
        let Some(record) = self.record.take() else {
            return Ok(());
        };
        if !self.store.compare_and_delete(&self.key, &record).await? {
            // The lease ran out and someone else may already hold it; their
            // record must not be removed.
            warn!(key = %self.key, "Lease expired before it was released");
        }
        Ok(())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };
        warn!(key = %self.key, "Lease guard dropped while held, releasing in background");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.store.clone();
            let key = std::mem::take(&mut self.key);
            handle.spawn(async move {
                if let Err(err) = store.compare_and_delete(&key, &record).await {
                    warn!(key = %key, error = %err, "Background lease release failed");
                }
            });
        }
    }
}

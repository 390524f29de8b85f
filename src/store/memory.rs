//! In-process key-value store with TTL.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::KeyValueStore;
use crate::clock::Clock;
use crate::error::Result;

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A [`KeyValueStore`] kept in process memory.
///
/// Expiry is evaluated against the supplied [`Clock`], so TTLs behave the
/// same way under a fake clock as leases in a real store would. Conditional
/// operations hold the shard lock for the key, which makes them atomic.
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record whose TTL has passed. Returns how many were removed.
    pub fn delete_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.entries.retain(|_, stored| {
            let live = stored.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        if removed > 0 {
            trace!(removed = removed, "Removed expired records");
        }
        removed
    }

    fn expiry(&self, now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        let ttl = TimeDelta::from_std(ttl?).unwrap_or(TimeDelta::MAX);
        Some(now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        match self.entries.get(key) {
            Some(stored) if stored.is_live(now) => return Ok(Some(stored.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        self.entries.remove_if(key, |_, stored| !stored.is_live(now));
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        let expires_at = self.expiry(now, ttl);
        self.entries
            .insert(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = self.expiry(now, ttl);

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = Some(occupied.get())
                    .filter(|stored| stored.is_live(now))
                    .map(|stored| stored.value.as_slice());
                if current != expected {
                    trace!(key = %key, "Conditional put rejected");
                    return Ok(false);
                }
                occupied.insert(StoredValue { value, expires_at });
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    trace!(key = %key, "Conditional put rejected, key absent");
                    return Ok(false);
                }
                vacant.insert(StoredValue { value, expires_at });
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let now = self.clock.now();
        let removed = self
            .entries
            .remove_if(key, |_, stored| {
                stored.is_live(now) && stored.value.as_slice() == expected
            })
            .is_some();
        Ok(removed)
    }
}

//! Keyed collection of limiters that expire when unused.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

struct RegistryEntry<T> {
    value: Arc<T>,
    expires_at: DateTime<Utc>,
}

/// Holds one limiter per key, created on first use.
///
/// Typical use is a limiter per client: entries not touched for their TTL
/// are dropped by [`delete_expired`](Registry::delete_expired). Dropping an
/// entry only forgets the local instance; shared bucket state stays in its
/// backend.
pub struct Registry<T> {
    entries: Mutex<HashMap<String, RegistryEntry<T>>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the instance for `key`, building it with `create` if absent.
    /// Either way the entry now expires `ttl` after `now`.
    pub fn get_or_create<F>(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
        create: F,
    ) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let expires_at = now
            .checked_add_signed(TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = expires_at;
            return Ok(entry.value.clone());
        }

        let value = Arc::new(create()?);
        debug!(key = %key, "Registered new limiter");
        entries.insert(
            key.to_string(),
            RegistryEntry {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(value)
    }

    /// Remove every entry whose expiry is at or before `now`.
    /// Returns how many were removed.
    pub fn delete_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed = removed, "Evicted expired limiters");
        }
        removed
    }

    /// Remove `key` regardless of its expiry.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

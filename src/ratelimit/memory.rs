//! Process-local state backend.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::backend::StateBackend;
use super::descriptor::BucketKey;
use super::state::BucketState;
use crate::error::Result;

/// Bucket state kept in a map in this process.
///
/// Each operation runs under an internal mutex, so conditional writes are
/// atomic and the backend is safe to use without a locker in race-check mode.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    states: Mutex<HashMap<BucketKey, BucketState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets with stored state.
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    /// Forget all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.states.lock().clear();
    }
}

#[async_trait]
impl StateBackend for InMemoryBackend {
    async fn read(&self, key: &BucketKey) -> Result<Option<BucketState>> {
        Ok(self.states.lock().get(key).copied())
    }

    async fn write(&self, key: &BucketKey, state: &BucketState) -> Result<()> {
        self.states.lock().insert(key.clone(), *state);
        Ok(())
    }

    async fn compare_and_write(
        &self,
        key: &BucketKey,
        expected: Option<&BucketState>,
        next: &BucketState,
    ) -> Result<bool> {
        let mut states = self.states.lock();
        if states.get(key) != expected {
            trace!(key = %key, "Stored state changed since read");
            return Ok(false);
        }
        states.insert(key.clone(), *next);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::state::Tokens;
    use chrono::Utc;

    #[tokio::test]
    async fn test_read_missing_bucket() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.read(&BucketKey::from("a")).await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let backend = InMemoryBackend::new();
        let key = BucketKey::from("a");
        let state = BucketState::full(Tokens::whole(3), Utc::now());

        backend.write(&key, &state).await.unwrap();
        assert_eq!(backend.read(&key).await.unwrap(), Some(state));
        assert_eq!(backend.len(), 1);

        backend.clear();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_write_detects_lost_race() {
        let backend = InMemoryBackend::new();
        let key = BucketKey::from("a");
        let now = Utc::now();
        let first = BucketState::full(Tokens::whole(3), now);
        let second = BucketState {
            available: Tokens::whole(2),
            last_update: now,
        };

        assert!(backend.compare_and_write(&key, None, &first).await.unwrap());
        // A second writer that also saw "absent" loses.
        assert!(!backend.compare_and_write(&key, None, &second).await.unwrap());
        assert!(backend
            .compare_and_write(&key, Some(&first), &second)
            .await
            .unwrap());
        assert_eq!(backend.read(&key).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_buckets_are_independent() {
        let backend = InMemoryBackend::new();
        let now = Utc::now();
        let a = BucketState::full(Tokens::whole(1), now);
        let b = BucketState::full(Tokens::whole(5), now);

        backend.write(&BucketKey::from("a"), &a).await.unwrap();
        backend.write(&BucketKey::from("b"), &b).await.unwrap();

        assert_eq!(backend.read(&BucketKey::from("a")).await.unwrap(), Some(a));
        assert_eq!(backend.read(&BucketKey::from("b")).await.unwrap(), Some(b));
    }
}

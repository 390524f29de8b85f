//! State backend over a remote key-value store.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::backend::StateBackend;
use super::descriptor::BucketKey;
use super::state::BucketState;
use crate::config::BackendConfig;
use crate::error::Result;
use crate::store::KeyValueStore;

/// Default prefix for bucket records.
pub const DEFAULT_PREFIX: &str = "limiters/token_bucket/";

/// Stores each bucket as a JSON record in a [`KeyValueStore`].
///
/// Conditional writes compare the encoded snapshot. The encoding is
/// canonical (integers only), so a snapshot read back and re-encoded yields
/// the exact bytes that are stored.
pub struct KvBackend {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    ttl: Option<Duration>,
}

impl KvBackend {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_PREFIX.to_string(),
            ttl: None,
        }
    }

    pub fn from_config(store: Arc<dyn KeyValueStore>, config: &BackendConfig) -> Self {
        Self::new(store)
            .with_prefix(config.prefix.clone())
            .with_ttl(config.state_ttl())
    }

    /// Namespace records under `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Let the store drop records idle for longer than `ttl`.
    ///
    /// The TTL must comfortably exceed the time a bucket needs to refill
    /// completely, otherwise an expired record resets the bucket to full.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    fn record_key(&self, key: &BucketKey) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl fmt::Debug for KvBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvBackend")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl StateBackend for KvBackend {
    async fn read(&self, key: &BucketKey) -> Result<Option<BucketState>> {
        let Some(bytes) = self.store.get(&self.record_key(key)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn write(&self, key: &BucketKey, state: &BucketState) -> Result<()> {
        let encoded = serde_json::to_vec(state)?;
        self.store
            .put(&self.record_key(key), encoded, self.ttl)
            .await
    }

    async fn compare_and_write(
        &self,
        key: &BucketKey,
        expected: Option<&BucketState>,
        next: &BucketState,
    ) -> Result<bool> {
        let expected = expected.map(|state| serde_json::to_vec(state)).transpose()?;
        let encoded = serde_json::to_vec(next)?;
        let record_key = self.record_key(key);

        let applied = self
            .store
            .compare_and_put(&record_key, expected.as_deref(), encoded, self.ttl)
            .await?;
        if !applied {
            trace!(key = %record_key, "Conditional write lost");
        }
        Ok(applied)
    }
}

//! Key-value store boundary.
//!
//! Remote stores (etcd, Redis, DynamoDB and the like) are reached through
//! [`KeyValueStore`]. The limiter only needs small records keyed by string,
//! an optional TTL, and a conditional write that compares the stored value.
//! Network clients for concrete stores live outside this crate.

mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryStore;

/// A key-value store holding one small record per key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` unconditionally.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Store `value` only if the current value equals `expected`.
    ///
    /// `expected = None` means the key must be absent. Returns `false` without
    /// touching the record when the comparison fails.
    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Remove the record only if its current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;
}

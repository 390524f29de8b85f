//! State backend trait for abstracting local and remote bucket storage.

use async_trait::async_trait;

use super::descriptor::BucketKey;
use super::state::BucketState;
use crate::error::Result;

/// Persistence for bucket state, one record per [`BucketKey`].
///
/// Every backend supports both ways of synchronizing a read-modify-write
/// cycle: callers either serialize access with a [`Locker`](crate::lock::Locker)
/// and use [`write`](StateBackend::write), or skip the lock and loop on
/// [`compare_and_write`](StateBackend::compare_and_write).
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Current snapshot, or `None` if the bucket has never been written.
    async fn read(&self, key: &BucketKey) -> Result<Option<BucketState>>;

    /// Store `state` unconditionally.
    async fn write(&self, key: &BucketKey, state: &BucketState) -> Result<()>;

    /// Store `next` only if the stored snapshot still equals `expected`
    /// (`None`: no snapshot stored). `Ok(false)` means another writer got
    /// there first and the caller should re-read.
    async fn compare_and_write(
        &self,
        key: &BucketKey,
        expected: Option<&BucketState>,
        next: &BucketState,
    ) -> Result<bool>;
}

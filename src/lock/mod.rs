//! Mutual exclusion around bucket read-modify-write cycles.
//!
//! A [`Locker`] hands out a [`LockGuard`]; the holder must call
//! [`LockGuard::unlock`] on every path out of the critical section.
//! Guards that are dropped while still held release best-effort, and
//! distributed locks additionally fall back to lease expiry.

mod lease;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{LimitersError, Result};

pub use lease::LeaseLocker;

/// Acquires exclusive access to some shared state.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Block until the lock is held or `cancel` fires.
    async fn lock(&self, cancel: &CancellationToken) -> Result<Box<dyn LockGuard>>;
}

/// Proof of a held lock.
#[async_trait]
pub trait LockGuard: Send {
    /// Release the lock. Calling it again is a no-op.
    async fn unlock(&mut self) -> Result<()>;
}

/// A locker that never blocks.
///
/// For backends used in race-check mode, or strictly single-task use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLocker;

impl NoopLocker {
    pub fn new() -> Self {
        Self
    }
}

struct NoopGuard;

#[async_trait]
impl LockGuard for NoopGuard {
    async fn unlock(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Locker for NoopLocker {
    async fn lock(&self, cancel: &CancellationToken) -> Result<Box<dyn LockGuard>> {
        if cancel.is_cancelled() {
            return Err(LimitersError::Cancelled);
        }
        Ok(Box::new(NoopGuard))
    }
}

/// Exclusive lock shared by the tasks of one process.
///
/// Clones share the same underlying lock.
#[derive(Debug, Clone, Default)]
pub struct LocalLocker {
    inner: Arc<Mutex<()>>,
}

impl LocalLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

struct LocalGuard {
    guard: Option<OwnedMutexGuard<()>>,
}

#[async_trait]
impl LockGuard for LocalGuard {
    async fn unlock(&mut self) -> Result<()> {
        self.guard.take();
        Ok(())
    }
}

#[async_trait]
impl Locker for LocalLocker {
    async fn lock(&self, cancel: &CancellationToken) -> Result<Box<dyn LockGuard>> {
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LimitersError::Cancelled),
            guard = self.inner.clone().lock_owned() => guard,
        };
        Ok(Box::new(LocalGuard { guard: Some(guard) }))
    }
}

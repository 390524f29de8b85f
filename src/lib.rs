//! Limiters - Distributed Rate Limiting
//!
//! This crate implements a token bucket rate limiter whose state is shared
//! between tasks and processes through a pluggable [`StateBackend`]. Access
//! to the shared state is serialized either by a [`Locker`] or by the
//! backend's conditional write, and time comes from a [`Clock`] so that the
//! whole algorithm can be driven by a virtual clock in tests.
//!
//! A denied call returns [`LimitersError::LimitExhausted`] with the time to
//! wait; waiting or rejecting is up to the caller.

pub mod clock;
pub mod config;
pub mod error;
pub mod lock;
pub mod ratelimit;
pub mod store;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{LimitersError, Result};
pub use lock::{LeaseLocker, LocalLocker, LockGuard, Locker, NoopLocker};
pub use ratelimit::{
    BucketKey, BucketState, InMemoryBackend, KvBackend, Registry, RetryPolicy, StateBackend,
    TokenBucket, Tokens,
};
pub use store::{KeyValueStore, MemoryStore};

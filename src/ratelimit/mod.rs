//! Token bucket rate limiting and bucket state management.

mod backend;
mod bucket;
mod descriptor;
mod kv;
mod memory;
mod registry;
mod retry;
mod state;

pub use backend::StateBackend;
pub use bucket::TokenBucket;
pub use descriptor::BucketKey;
pub use kv::{KvBackend, DEFAULT_PREFIX};
pub use memory::InMemoryBackend;
pub use registry::Registry;
pub use retry::RetryPolicy;
pub use state::{BucketState, Tokens, NANOS_PER_TOKEN};

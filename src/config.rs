//! Configuration management for limiters.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{LimitersError, Result};
use crate::ratelimit::RetryPolicy;

/// Environment variable prefix for [`LimitersConfig::load`] overrides.
pub const ENV_PREFIX: &str = "LIMITERS";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitersConfig {
    /// Token buckets to construct
    #[serde(default)]
    pub buckets: Vec<BucketConfig>,

    /// Retry settings for race-check mode
    #[serde(default)]
    pub retry: RetryConfig,

    /// Distributed lock settings
    #[serde(default)]
    pub lock: LockConfig,

    /// Remote state backend settings
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Configuration for a single token bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Bucket identity in the state backend
    pub key: String,

    /// Maximum whole tokens the bucket holds
    pub capacity: u64,

    /// Time to generate one token, in milliseconds
    pub refill_period_ms: u64,

    /// Use conditional writes instead of a lock
    #[serde(default)]
    pub race_check: bool,
}

impl BucketConfig {
    pub fn refill_period(&self) -> Duration {
        Duration::from_millis(self.refill_period_ms)
    }

    /// Reject configurations the bucket cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(LimitersError::Config("bucket key must not be empty".into()));
        }
        if self.capacity == 0 {
            return Err(LimitersError::Config(format!(
                "bucket {}: capacity must be positive",
                self.key
            )));
        }
        if self.refill_period_ms == 0 {
            return Err(LimitersError::Config(format!(
                "bucket {}: refill period must be positive",
                self.key
            )));
        }
        Ok(())
    }
}

/// Settings for state kept in a key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Namespace for bucket records
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Retention of idle records, in milliseconds
    #[serde(default)]
    pub state_ttl_ms: Option<u64>,
}

impl BackendConfig {
    pub fn state_ttl(&self) -> Option<Duration> {
        self.state_ttl_ms.map(Duration::from_millis)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            state_ttl_ms: None,
        }
    }
}

fn default_prefix() -> String {
    crate::ratelimit::DEFAULT_PREFIX.to_string()
}

/// Bounded retry settings for optimistic writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts before giving up with a contention error
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff, in milliseconds
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Backoff ceiling, in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }
}

fn default_max_attempts() -> u32 {
    16
}

fn default_base_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    50
}

/// Lease lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a lease stays valid without release, in milliseconds
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_ms: u64,

    /// Poll interval while the lease is held elsewhere, in milliseconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
}

impl LockConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// A zero TTL writes leases that are already expired, so nobody is
    /// excluded. A zero interval turns waiting into a busy poll.
    pub fn validate(&self) -> Result<()> {
        if self.lease_ttl_ms == 0 {
            return Err(LimitersError::Config(
                "lock.lease_ttl_ms must be positive".into(),
            ));
        }
        if self.retry_interval_ms == 0 {
            return Err(LimitersError::Config(
                "lock.retry_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: default_lease_ttl(),
            retry_interval_ms: default_retry_interval(),
        }
    }
}

fn default_lease_ttl() -> u64 {
    5000
}

fn default_retry_interval() -> u64 {
    10
}

impl LimitersConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LimitersConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LimitersError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a YAML file layered with `LIMITERS__*` environment overrides,
    /// e.g. `LIMITERS__RETRY__MAX_ATTEMPTS=32`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading layered limiter configuration");

        let config: LimitersConfig = ::config::Config::builder()
            .add_source(
                ::config::File::from(path.to_path_buf()).format(::config::FileFormat::Yaml),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for bucket in &self.buckets {
            bucket.validate()?;
        }
        if self.retry.max_attempts == 0 {
            return Err(LimitersError::Config(
                "retry.max_attempts must be positive".into(),
            ));
        }
        self.lock.validate()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    /// Find a bucket by key.
    pub fn bucket(&self, key: &str) -> Option<&BucketConfig> {
        self.buckets.iter().find(|b| b.key == key)
    }
}

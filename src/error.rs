//! Error types for limiter operations.

use std::time::Duration;

use thiserror::Error;

/// Main error type for limiter operations.
#[derive(Error, Debug)]
pub enum LimitersError {
    /// The bucket has no whole token left. Not a fault: `wait` is how long
    /// the caller has to wait before a token becomes available.
    #[error("Rate limit exhausted, retry in {wait:?}")]
    LimitExhausted { wait: Duration },

    /// Optimistic writes kept losing races until the retry ceiling was hit.
    #[error("Gave up after {attempts} contended state updates")]
    Contention { attempts: u32 },

    /// The caller cancelled while we were waiting on a lock or a retry.
    #[error("Operation cancelled")]
    Cancelled,

    /// State backend or store failures
    #[error("Backend error: {0}")]
    Backend(String),

    /// Stored record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimitersError {
    /// Whether this is the regular capacity denial.
    pub fn is_limit_exhausted(&self) -> bool {
        matches!(self, LimitersError::LimitExhausted { .. })
    }

    /// The wait attached to a denial, if any.
    pub fn wait(&self) -> Option<Duration> {
        match self {
            LimitersError::LimitExhausted { wait } => Some(*wait),
            _ => None,
        }
    }

    /// Whether retrying the same call may succeed without waiting for refill.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LimitersError::Contention { .. })
    }
}

impl From<::config::ConfigError> for LimitersError {
    fn from(err: ::config::ConfigError) -> Self {
        LimitersError::Config(err.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimitersError>;

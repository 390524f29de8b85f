//! Bucket identity.

use std::fmt;

/// The key that partitions bucket state in a backend.
///
/// Every limiter built with the same key against the same backend shares
/// one logical bucket, whichever process it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(String);

impl BucketKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build a key from a domain and ordered descriptor entries.
    ///
    /// Entries are kept in the given order, so `[(a, 1), (b, 2)]` and
    /// `[(b, 2), (a, 1)]` name different buckets.
    pub fn from_descriptor<K, V>(domain: &str, entries: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let entries_str: Vec<String> = entries
            .iter()
            .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
            .collect();

        Self(format!("{}:{}", domain, entries_str.join(",")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BucketKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BucketKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for BucketKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

//! KV store trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvError;

/// Trait for ephemeral key-value backends.
///
/// Implementations cover the worker tier's counter, flag, and config
/// needs: atomic increments, TTL'd writes, and prefix enumeration.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically add `delta` to an integer key, returning the new value.
    /// Missing keys start at zero.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, KvError>;

    /// Read a key. `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Write a key with a time-to-live. Overwrites refresh the TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Delete keys. Missing keys are ignored.
    async fn del(&self, keys: &[String]) -> Result<(), KvError>;

    /// Enumerate keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

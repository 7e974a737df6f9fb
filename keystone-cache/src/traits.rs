//! Cache store trait definition.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// A key/value store holding serialized snapshots.
///
/// Used for the in-process tier of [`DocumentCache`](crate::DocumentCache).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Serialized value under `key`, unless absent or expired.
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a serialized value; `None` keeps it until deleted.
    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a key from the cache.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Whether a live entry exists under `key`.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Drop every entry.
    async fn clear(&self) -> CacheResult<()>;

    /// Delete several keys concurrently.
    async fn delete_many(&self, keys: &[String]) -> CacheResult<()> {
        futures::future::try_join_all(keys.iter().map(|key| self.delete(key))).await?;
        Ok(())
    }
}

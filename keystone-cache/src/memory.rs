//! In-process cache tier.

use crate::error::CacheResult;
use crate::traits::CacheStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// In-memory cache with per-entry expiration.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    data: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

impl InMemoryCache {
    /// Create new in-memory cache
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get_json(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        {
            let data = self.data.read().await;
            match data.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: evict unless a fresh value was written meanwhile.
        let mut data = self.data.write().await;
        if data.get(key).is_some_and(|entry| !entry.is_live(now)) {
            data.remove(key);
        }
        Ok(data.get(key).map(|entry| entry.value.clone()))
    }

    async fn set_json(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        let entry = CacheEntry { value, expires_at };
        self.data.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.get_json(key).await.map(|v| v.is_some())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.data.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCache::new();

        cache.set_json("roles", "{}".to_string(), None).await.unwrap();
        assert_eq!(cache.get_json("roles").await.unwrap(), Some("{}".to_string()));
        assert!(cache.exists("roles").await.unwrap());

        cache.delete("roles").await.unwrap();
        assert_eq!(cache.get_json("roles").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = InMemoryCache::new();
        cache
            .set_json("settings", "{}".to_string(), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.exists("settings").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!cache.exists("settings").await.unwrap());
        assert!(cache.data.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_many() {
        let cache = InMemoryCache::new();
        for key in ["a", "b", "c"] {
            cache.set_json(key, "1".to_string(), None).await.unwrap();
        }

        cache
            .delete_many(&["a".to_string(), "c".to_string()])
            .await
            .unwrap();

        assert_eq!(cache.data.read().await.len(), 1);
        assert!(cache.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = InMemoryCache::new();
        cache.set_json("a", "1".to_string(), None).await.unwrap();

        cache.clear().await.unwrap();

        assert!(!cache.exists("a").await.unwrap());
    }
}

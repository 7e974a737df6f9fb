//! Two-tier document cache kept coherent across nodes.
//!
//! Reads check the in-process tier, then the distributed tier, promoting
//! distributed hits locally. Writes go to both tiers and broadcast an
//! invalidation so every other node drops its local copy. Tag removals
//! reported by a [`TagCache`] evict the removed keys from both tiers and from
//! every peer.
//!
//! The local tier is only trusted while the invalidation subscription is
//! live. It is cleared whenever the subscription is lost or re-established,
//! since invalidations published in between never arrive.

use crate::bus::{MessageBus, MessageHandler};
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::gateway::CacheGateway;
use crate::memory::InMemoryCache;
use crate::tags::{TagCache, TagRemovedHandler};
use crate::traits::CacheStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Payload broadcast on the invalidation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Node that produced the change.
    pub origin: String,
    /// Keys whose local copies must be dropped.
    pub keys: Vec<String>,
}

/// Read-through / write-through cache for serialized documents.
pub struct DocumentCache {
    node_id: String,
    local: Arc<dyn CacheStore>,
    gateway: Arc<dyn CacheGateway>,
    bus: Arc<dyn MessageBus>,
    tags: Option<Arc<dyn TagCache>>,
    config: CacheConfig,
    subscribed: AtomicBool,
    next_resume: Mutex<Option<Instant>>,
}

impl DocumentCache {
    /// Create a cache and register it on the invalidation channel.
    pub async fn new(
        gateway: Arc<dyn CacheGateway>,
        bus: Arc<dyn MessageBus>,
        config: CacheConfig,
    ) -> Arc<Self> {
        Self::builder(gateway, bus).config(config).build().await
    }

    /// Start building a cache with optional collaborators.
    pub fn builder(gateway: Arc<dyn CacheGateway>, bus: Arc<dyn MessageBus>) -> DocumentCacheBuilder {
        DocumentCacheBuilder {
            gateway,
            bus,
            local: None,
            tags: None,
            config: CacheConfig::default(),
        }
    }

    /// Identifier of this node on the invalidation channel.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Whether invalidations from peers are currently being received.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Get a typed value, trying the local tier first.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        validate_key(key)?;
        self.resume().await;

        if let Some(json) = self.local.get_json(key).await? {
            return decode(&json).map(Some);
        }

        if !self.connect().await {
            return Ok(None);
        }

        match self.gateway.get(key).await {
            Ok(Some(json)) => {
                let value = decode(&json)?;
                self.local.set_json(key, json, self.config.local_ttl).await?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(key = %key, error = %e, "Distributed cache read failed");
                Ok(None)
            }
        }
    }

    /// Store a typed value in both tiers, tag it, and invalidate peers.
    ///
    /// `ttl` falls back to [`CacheConfig::default_ttl`].
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &[&str],
    ) -> CacheResult<()> {
        validate_key(key)?;
        let json = encode(value)?;
        let ttl = ttl.or(self.config.default_ttl);

        let connected = self.connect().await;
        self.local.set_json(key, json.clone(), self.local_ttl(ttl)).await?;

        if connected {
            if let Err(e) = self.gateway.set(key, &json, ttl).await {
                warn!(key = %key, error = %e, "Distributed cache write failed");
            }
            self.tag(key, tags).await;
        }

        self.broadcast(vec![key.to_string()]).await;
        Ok(())
    }

    /// Populate the cache with a value just loaded after a miss.
    ///
    /// Unlike [`DocumentCache::set`], a fill never replaces a distributed entry
    /// and never invalidates peers, so a write committed while the value was
    /// being loaded always wins. Returns `false` when a distributed entry
    /// already existed and nothing was cached.
    pub async fn fill<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &[&str],
    ) -> CacheResult<bool> {
        validate_key(key)?;
        let json = encode(value)?;
        let ttl = ttl.or(self.config.default_ttl);

        let connected = self.connect().await;
        // Written before the distributed entry: an invalidation for a newer
        // write can only arrive after this point and drops the local copy.
        self.local.set_json(key, json.clone(), self.local_ttl(ttl)).await?;
        if !connected {
            return Ok(true);
        }

        match self.gateway.set_if_absent(key, &json, ttl).await {
            Ok(true) => {
                self.tag(key, tags).await;
                Ok(true)
            }
            Ok(false) => {
                debug!(key = %key, "Distributed entry already present, fill skipped");
                self.local.delete(key).await?;
                Ok(false)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Distributed cache fill failed");
                Ok(true)
            }
        }
    }

    /// Remove a key from both tiers and from every peer.
    pub async fn remove(&self, key: &str) -> CacheResult<()> {
        validate_key(key)?;
        self.evict(vec![key.to_string()]).await
    }

    /// Drop the local copy only.
    pub async fn remove_local(&self, key: &str) -> CacheResult<()> {
        self.local.delete(key).await
    }

    async fn evict(&self, keys: Vec<String>) -> CacheResult<()> {
        self.local.delete_many(&keys).await?;

        if self.connect().await
            && let Err(e) = self.gateway.delete(&keys).await
        {
            warn!(keys = ?keys, error = %e, "Distributed cache eviction failed");
        }

        self.broadcast(keys).await;
        Ok(())
    }

    async fn tag(&self, key: &str, tags: &[&str]) {
        if let Some(tag_cache) = &self.tags
            && !tags.is_empty()
        {
            tag_cache.tag(key, tags).await;
        }
    }

    /// Connect to the backend, restoring the invalidation subscription when
    /// none is live.
    async fn connect(&self) -> bool {
        if !self.gateway.connect().await {
            return false;
        }
        if !self.is_subscribed() {
            self.bus.resubscribe().await;
        }
        true
    }

    /// Try to restore a lost subscription before serving local hits, at most
    /// once per [`CacheConfig::resubscribe_interval`].
    async fn resume(&self) {
        if self.is_subscribed() {
            return;
        }

        let now = Instant::now();
        {
            let mut next = self.next_resume.lock();
            if next.is_some_and(|at| now < at) {
                return;
            }
            *next = Some(now + self.config.resubscribe_interval);
        }

        self.connect().await;
    }

    fn local_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        match (ttl, self.config.local_ttl) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn broadcast(&self, keys: Vec<String>) {
        let message = InvalidationMessage {
            origin: self.node_id.clone(),
            keys,
        };
        match serde_json::to_string(&message) {
            Ok(payload) => {
                self.bus
                    .publish(&self.config.invalidation_channel, &payload)
                    .await;
            }
            Err(e) => warn!(error = %e, "Unable to encode invalidation message"),
        }
    }

    async fn on_invalidation(&self, payload: &str) {
        let message: InvalidationMessage = match serde_json::from_str(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed invalidation message");
                return;
            }
        };

        if message.origin == self.node_id {
            return;
        }

        debug!(origin = %message.origin, keys = ?message.keys, "Dropping invalidated local entries");
        if let Err(e) = self.local.delete_many(&message.keys).await {
            warn!(error = %e, "Local eviction failed");
        }
    }

    async fn on_subscription_changed(&self, live: bool) {
        self.subscribed.store(live, Ordering::Release);
        info!(node = %self.node_id, live = live, "Invalidation subscription changed, clearing local tier");
        if let Err(e) = self.local.clear().await {
            warn!(error = %e, "Unable to clear local tier");
        }
    }
}

#[async_trait]
impl TagRemovedHandler for DocumentCache {
    async fn on_tag_removed(&self, tag: &str, removed_keys: &[String]) {
        debug!(tag = %tag, keys = removed_keys.len(), "Evicting keys of removed tag");
        if let Err(e) = self.evict(removed_keys.to_vec()).await {
            warn!(tag = %tag, error = %e, "Eviction after tag removal failed");
        }
    }
}

/// Builder for [`DocumentCache`].
pub struct DocumentCacheBuilder {
    gateway: Arc<dyn CacheGateway>,
    bus: Arc<dyn MessageBus>,
    local: Option<Arc<dyn CacheStore>>,
    tags: Option<Arc<dyn TagCache>>,
    config: CacheConfig,
}

impl DocumentCacheBuilder {
    /// Use a custom in-process tier instead of [`InMemoryCache`].
    pub fn local(mut self, local: Arc<dyn CacheStore>) -> Self {
        self.local = Some(local);
        self
    }

    /// Tag written keys in `tags` and evict on its tag removals.
    pub fn tags(mut self, tags: Arc<dyn TagCache>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the cache and register its handlers.
    ///
    /// The backend is not contacted here; the invalidation subscription opens
    /// on first use of the cache.
    pub async fn build(self) -> Arc<DocumentCache> {
        let cache = Arc::new(DocumentCache {
            node_id: Uuid::new_v4().to_string(),
            local: self
                .local
                .unwrap_or_else(|| Arc::new(InMemoryCache::new())),
            gateway: self.gateway,
            bus: self.bus,
            tags: self.tags,
            config: self.config,
            subscribed: AtomicBool::new(false),
            next_resume: Mutex::new(None),
        });

        if let Some(tag_cache) = &cache.tags {
            tag_cache.register_handler(Arc::new(TagEviction {
                cache: Arc::downgrade(&cache),
            }));
        }

        let listener = InvalidationListener {
            cache: Arc::downgrade(&cache),
        };
        cache
            .bus
            .subscribe(&cache.config.invalidation_channel, Arc::new(listener))
            .await;

        cache
    }
}

struct InvalidationListener {
    cache: Weak<DocumentCache>,
}

#[async_trait]
impl MessageHandler for InvalidationListener {
    async fn handle(&self, _channel: &str, message: &str) {
        if let Some(cache) = self.cache.upgrade() {
            cache.on_invalidation(message).await;
        }
    }

    async fn on_subscribed(&self, _channel: &str) {
        if let Some(cache) = self.cache.upgrade() {
            cache.on_subscription_changed(true).await;
        }
    }

    async fn on_unsubscribed(&self, _channel: &str) {
        if let Some(cache) = self.cache.upgrade() {
            cache.on_subscription_changed(false).await;
        }
    }
}

struct TagEviction {
    cache: Weak<DocumentCache>,
}

#[async_trait]
impl TagRemovedHandler for TagEviction {
    async fn on_tag_removed(&self, tag: &str, removed_keys: &[String]) {
        if let Some(cache) = self.cache.upgrade() {
            cache.on_tag_removed(tag, removed_keys).await;
        }
    }
}

fn validate_key(key: &str) -> CacheResult<()> {
    if key.trim().is_empty() {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn encode<T: Serialize + ?Sized>(value: &T) -> CacheResult<String> {
    serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(json: &str) -> CacheResult<T> {
    serde_json::from_str(json).map_err(|e| CacheError::Deserialization(e.to_string()))
}

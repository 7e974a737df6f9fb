//! Tag-based cache invalidation

use crate::gateway::CacheGateway;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Notified after a tag has been cleared from the index.
///
/// Handlers own the eviction of the removed keys' cache entries.
#[async_trait]
pub trait TagRemovedHandler: Send + Sync {
    /// Called with the tag and the keys it grouped at removal time.
    async fn on_tag_removed(&self, tag: &str, removed_keys: &[String]);
}

/// Index from tags to the cache keys they group.
///
/// Every operation is best effort: an unreachable backend turns writes into
/// no-ops and reads into empty results.
#[async_trait]
pub trait TagCache: Send + Sync {
    /// Add `key` to each tag's set.
    async fn tag(&self, key: &str, tags: &[&str]);

    /// Keys currently grouped under `tag`.
    async fn get_tagged_items(&self, tag: &str) -> Vec<String>;

    /// Clear `tag` and notify every registered [`TagRemovedHandler`].
    async fn remove_tag(&self, tag: &str);

    /// Register a handler for tag removals.
    fn register_handler(&self, handler: Arc<dyn TagRemovedHandler>);

    /// Clear several tags in turn.
    async fn remove_tags(&self, tags: &[&str]) {
        for tag in tags {
            self.remove_tag(tag).await;
        }
    }
}

/// [`TagCache`] storing one backend set per tag.
///
/// Removal reads the members before deleting the set. The two steps are not
/// atomic: a key tagged in between is either dropped from the index without
/// being reported to the handlers, or survives the removal.
pub struct DistributedTagCache {
    gateway: Arc<dyn CacheGateway>,
    handlers: RwLock<Vec<Arc<dyn TagRemovedHandler>>>,
}

impl DistributedTagCache {
    /// Create a tag index over `gateway`.
    pub fn new(gateway: Arc<dyn CacheGateway>) -> Self {
        Self {
            gateway,
            handlers: RwLock::new(Vec::new()),
        }
    }

    fn tag_key(tag: &str) -> String {
        format!("tag:{}", tag)
    }
}

#[async_trait]
impl TagCache for DistributedTagCache {
    async fn tag(&self, key: &str, tags: &[&str]) {
        if !self.gateway.connect().await {
            debug!(key = %key, "Cache backend unavailable, tagging skipped");
            return;
        }

        for tag in tags {
            if let Err(e) = self.gateway.set_add(&Self::tag_key(tag), key).await {
                warn!(tag = %tag, key = %key, error = %e, "Unable to tag cache key");
            }
        }
    }

    async fn get_tagged_items(&self, tag: &str) -> Vec<String> {
        if !self.gateway.connect().await {
            return Vec::new();
        }

        match self.gateway.set_members(&Self::tag_key(tag)).await {
            Ok(members) => members,
            Err(e) => {
                warn!(tag = %tag, error = %e, "Unable to read tag members");
                Vec::new()
            }
        }
    }

    async fn remove_tag(&self, tag: &str) {
        let keys = self.get_tagged_items(tag).await;
        if keys.is_empty() {
            return;
        }

        if let Err(e) = self.gateway.delete(&[Self::tag_key(tag)]).await {
            warn!(tag = %tag, error = %e, "Unable to delete tag");
        }

        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler.on_tag_removed(tag, &keys).await;
        }

        debug!(tag = %tag, keys = keys.len(), "Tag removed");
    }

    fn register_handler(&self, handler: Arc<dyn TagRemovedHandler>) {
        self.handlers.write().push(handler);
    }
}

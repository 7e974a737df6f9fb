//! Distributed cache invalidation for Keystone.
//!
//! Keeps in-process caches of many nodes coherent through a shared backend
//! (Redis in production) and a pub/sub bus.
//!
//! # Features
//!
//! - **Connection gateway** - lazy backend connection with a connected flag;
//!   everything degrades to "no cached data" while it is down
//! - **Tag-based invalidation** - group keys under tags and evict them together
//! - **Message bus** - cross-node broadcast of invalidations
//! - **Two-tier document cache** - local tier in front of the distributed tier
//!
//! # Examples
//!
//! ## Tag-based Invalidation
//!
//! ```no_run
//! use keystone_cache::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), CacheError> {
//! let gateway: Arc<dyn CacheGateway> =
//!     Arc::new(keystone_redis::RedisService::from_connection_string("redis://localhost:6379"));
//! let bus = Arc::new(GatewayMessageBus::new(gateway.clone()));
//! let tags = Arc::new(DistributedTagCache::new(gateway.clone()));
//!
//! let cache = DocumentCache::builder(gateway, bus).tags(tags.clone()).build().await;
//! cache.set("user:123", &"Alice", None, &["users"]).await?;
//!
//! // Evicts "user:123" here and on every other node
//! tags.remove_tag("users").await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod document_cache;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod tags;
pub mod traits;

pub use bus::{FnHandler, GatewayMessageBus, MessageBus, MessageHandler};
pub use config::{CacheConfig, DEFAULT_INVALIDATION_CHANNEL};
pub use document_cache::{DocumentCache, DocumentCacheBuilder, InvalidationMessage};
pub use error::{CacheError, CacheResult};
pub use gateway::{CacheGateway, InMemoryBackend, InMemoryGateway};
pub use memory::InMemoryCache;
pub use tags::{DistributedTagCache, TagCache, TagRemovedHandler};
pub use traits::CacheStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bus::{GatewayMessageBus, MessageBus, MessageHandler};
    pub use crate::config::CacheConfig;
    pub use crate::document_cache::DocumentCache;
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::gateway::{CacheGateway, InMemoryBackend, InMemoryGateway};
    pub use crate::memory::InMemoryCache;
    pub use crate::tags::{DistributedTagCache, TagCache, TagRemovedHandler};
    pub use crate::traits::CacheStore;
}

// Keystone - distributed document cache coherency
//
// Singleton documents persisted through a unit of work, cached in-process on
// every node, and kept coherent through a shared cache backend and pub/sub.

// Re-export member crates
pub use keystone_cache;
pub use keystone_documents;
pub use keystone_redis;

#[cfg(feature = "roles")]
pub use keystone_roles;

// Re-export the most used types at the root
pub use keystone_cache::{
    CacheConfig, CacheError, CacheGateway, DistributedTagCache, DocumentCache, GatewayMessageBus,
    InMemoryBackend, InMemoryGateway, MessageBus, TagCache, TagRemovedHandler,
};
pub use keystone_documents::{
    Document, DocumentError, DocumentManager, DocumentOptions, DocumentSession, DocumentStore,
    InMemoryDocumentDb, Tracked,
};
pub use keystone_redis::{RedisConfig, RedisService};

// Prelude for common imports
pub mod prelude {
    pub use keystone_cache::prelude::*;
    pub use keystone_documents::prelude::*;
    pub use keystone_redis::{RedisConfig, RedisService};

    #[cfg(feature = "roles")]
    pub use keystone_roles::{Role, RoleClaim, RoleError, RoleStore};
}

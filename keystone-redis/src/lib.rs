//! # Keystone Redis
//!
//! Redis plumbing for the Keystone distributed document cache.
//!
//! ## Features
//!
//! - **Lazy connection**: nothing is dialed until the first command
//! - **Graceful configuration**: a missing or malformed connection string
//!   yields a disabled service instead of a startup failure
//! - **Pub/Sub**: channel subscriptions delivered through [`Subscription`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keystone_redis::RedisService;
//!
//! #[tokio::main]
//! async fn main() {
//!     let redis = RedisService::from_connection_string("redis://localhost:6379");
//!
//!     if redis.connect().await {
//!         redis.sadd("tag:roles", "roles-document").await.ok();
//!     }
//! }
//! ```

mod config;
mod error;
mod pubsub;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pubsub::{Message, PubSub, Subscription};
pub use service::RedisService;

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::pubsub::{Message, Subscription};
    pub use crate::service::RedisService;
}

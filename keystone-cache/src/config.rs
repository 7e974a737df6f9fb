//! Cache configuration types.

use std::time::Duration;

/// Channel used for cross-node invalidation unless configured otherwise.
pub const DEFAULT_INVALIDATION_CHANNEL: &str = "keystone:invalidate";

/// Document cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Expiration applied to distributed entries when the caller gives none
    pub default_ttl: Option<Duration>,

    /// Expiration of entries in the in-process tier
    pub local_ttl: Option<Duration>,

    /// Bus channel carrying invalidation messages
    pub invalidation_channel: String,

    /// Minimum delay between attempts to restore a lost invalidation
    /// subscription while local hits are being served
    pub resubscribe_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            local_ttl: Some(Duration::from_secs(300)),
            invalidation_channel: DEFAULT_INVALIDATION_CHANNEL.to_string(),
            resubscribe_interval: Duration::from_secs(1),
        }
    }
}

impl CacheConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default TTL of distributed entries.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set the TTL of in-process entries. `None` keeps them until invalidated.
    pub fn with_local_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.local_ttl = ttl;
        self
    }

    /// Set the invalidation channel.
    pub fn with_invalidation_channel(mut self, channel: impl Into<String>) -> Self {
        self.invalidation_channel = channel.into();
        self
    }

    /// Set the delay between attempts to restore the invalidation subscription.
    pub fn with_resubscribe_interval(mut self, interval: Duration) -> Self {
        self.resubscribe_interval = interval;
        self
    }
}

//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
///
/// Backend unavailability is reported through [`CacheError::Unavailable`] by
/// the gateway only; the tag index, the bus and the document cache swallow it
/// and degrade to "no cached data".
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis-specific error
    #[error("Redis error: {0}")]
    Redis(#[from] keystone_redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The distributed backend cannot be reached
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    /// Empty or otherwise unusable key or tag
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),
}

impl CacheError {
    /// Whether this error means the backend is down rather than misused.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Redis(e) => e.is_connection_error(),
            _ => false,
        }
    }
}

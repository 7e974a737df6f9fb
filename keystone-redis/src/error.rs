//! Redis error types.

use thiserror::Error;

/// Result type for Redis operations.
pub type Result<T> = std::result::Result<T, RedisError>;

/// Redis errors.
#[derive(Debug, Error)]
pub enum RedisError {
    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The service was built without a usable configuration.
    #[error("Redis is disabled: {0}")]
    Disabled(String),

    /// Command error.
    #[error("Command error: {0}")]
    Command(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Pub/Sub error.
    #[error("Pub/Sub error: {0}")]
    PubSub(String),

    /// Underlying Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl RedisError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Redis(e) => e.is_connection_dropped() || e.is_timeout(),
            _ => false,
        }
    }

    /// Check if this error indicates the backend cannot be reached.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Disabled(_) => true,
            Self::Redis(e) => e.is_io_error() || e.is_connection_refusal(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_are_retryable() {
        let err = RedisError::Connection("refused".to_string());
        assert!(err.is_retryable());
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_disabled_is_not_retryable() {
        let err = RedisError::Disabled("no url".to_string());
        assert!(!err.is_retryable());
        assert!(err.is_connection_error());
        assert_eq!(err.to_string(), "Redis is disabled: no url");
    }
}

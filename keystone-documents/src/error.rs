//! Error types for the document store.

use keystone_cache::CacheError;
use std::fmt;
use thiserror::Error;

/// Result type for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors raised by a persistence engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The stored version no longer matches the one the document was loaded with.
    #[error(
        "Concurrency conflict on '{document_type}': expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        document_type: String,
        expected: u64,
        actual: u64,
    },

    /// Any other storage failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SessionError {
    /// Whether this is an optimistic concurrency conflict.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Lifecycle of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    /// Documents may be loaded and mutated.
    Open,
    /// The persistence engine is committing.
    Committing,
    /// Changes were persisted.
    Committed,
    /// The commit hit a concurrency conflict.
    Conflicted,
    /// The unit of work was aborted.
    Canceled,
    /// The commit failed for another reason.
    Failed,
}

impl UnitOfWorkState {
    /// Whether operations are still accepted.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Conflicted => "conflicted",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Document store errors.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// A document changed concurrently; raised by the failure hook registered
    /// through `DocumentStore::update`.
    #[error(
        "The document '{document_type}' could not be persisted and cached as it has been changed by another process"
    )]
    Concurrency { document_type: String },

    /// Error raised by the persistence engine, including untranslated conflicts.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Cache failure that is not a mere backend outage.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A document could not be converted to or from its stored form.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The unit of work no longer accepts operations.
    #[error("The unit of work is {0} and accepts no further operations")]
    Closed(UnitOfWorkState),
}

impl DocumentError {
    /// Whether this error reports a concurrent modification, translated or not.
    pub fn is_concurrency(&self) -> bool {
        match self {
            Self::Concurrency { .. } => true,
            Self::Session(e) => e.is_concurrency_conflict(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for DocumentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_message_names_document() {
        let err = DocumentError::Concurrency {
            document_type: "RolesDocument".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "The document 'RolesDocument' could not be persisted and cached as it has been changed by another process"
        );
        assert!(err.is_concurrency());
    }

    #[test]
    fn test_untranslated_conflict_is_concurrency() {
        let err: DocumentError = SessionError::ConcurrencyConflict {
            document_type: "Settings".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(err.is_concurrency());
        assert!(!DocumentError::Closed(UnitOfWorkState::Canceled).is_concurrency());
    }
}

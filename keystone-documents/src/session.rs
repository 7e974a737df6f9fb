//! Persistence engine interface.

use crate::error::SessionError;
use async_trait::async_trait;
use serde_json::Value;

/// A stored row and its concurrency token.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Serialized document.
    pub content: Value,
    /// Version of the row; starts at 1 and grows with every commit.
    pub version: u64,
}

/// Version expected for a row that does not exist yet.
pub const NEW_DOCUMENT_VERSION: u64 = 0;

/// One transaction against the persistence engine.
///
/// A session belongs to a single unit of work and is never shared between
/// tasks, hence the `&mut self` receivers.
#[async_trait]
pub trait DocumentSession: Send + Sync {
    /// Load the single row stored for `document_type`.
    ///
    /// Rows already read in this session are returned from the session's
    /// identity map until [`DocumentSession::detach`] is called.
    async fn query(&mut self, document_type: &str) -> Result<Option<StoredDocument>, SessionError>;

    /// Stop tracking the row of `document_type` so the next query re-reads it.
    fn detach(&mut self, document_type: &str);

    /// Schedule a write. With `expected_version`, the commit fails with
    /// [`SessionError::ConcurrencyConflict`] when the stored version differs.
    async fn save(
        &mut self,
        document_type: &str,
        content: Value,
        expected_version: Option<u64>,
    ) -> Result<(), SessionError>;

    /// Apply every scheduled write atomically.
    async fn commit(&mut self) -> Result<(), SessionError>;

    /// Discard every scheduled write.
    async fn cancel(&mut self) -> Result<(), SessionError>;

    /// Whether a transaction has been started and not yet completed.
    fn in_transaction(&self) -> bool;
}

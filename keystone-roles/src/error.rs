//! Error types for the role store.

use keystone_documents::DocumentError;
use thiserror::Error;

/// Result type for role operations.
pub type RoleResult<T> = Result<T, RoleError>;

/// Role store errors.
#[derive(Debug, Error)]
pub enum RoleError {
    /// A role with the same normalized name already exists.
    #[error("Role already exists: {0}")]
    Duplicate(String),

    /// No role with this name exists.
    #[error("Role not found: {0}")]
    NotFound(String),

    /// The role name is empty once trimmed.
    #[error("Role name must not be empty")]
    InvalidName,

    /// Loading or persisting the roles document failed.
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl RoleError {
    /// Whether the roles document was changed by another process.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Document(e) if e.is_concurrency())
    }
}

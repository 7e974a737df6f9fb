//! Unit-of-work document store for Keystone.
//!
//! A document is a singleton aggregate (one row per type) that is read often
//! and written rarely. Reads go through the cache; writes go through a
//! [`DocumentStore`] that persists them under optimistic concurrency and
//! refreshes the cache on every node once the commit succeeds.
//!
//! # Examples
//!
//! ```no_run
//! use keystone_cache::{DocumentCache, GatewayMessageBus, InMemoryBackend, InMemoryGateway};
//! use keystone_documents::*;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct SiteSettings {
//!     title: String,
//! }
//!
//! impl Document for SiteSettings {}
//!
//! # async fn example() -> Result<(), DocumentError> {
//! let gateway = Arc::new(InMemoryGateway::new(InMemoryBackend::new()));
//! let bus = Arc::new(GatewayMessageBus::new(gateway.clone()));
//! let cache = DocumentCache::builder(gateway, bus).build().await;
//! let settings = DocumentManager::<SiteSettings>::new(cache);
//!
//! let db = InMemoryDocumentDb::new();
//! let mut store = DocumentStore::new(db.session());
//! let document = settings.get_or_create_mutable(&mut store).await?;
//! document.write().title = "Keystone".to_string();
//! settings.update(&mut store, &document).await?;
//! store.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod document;
pub mod error;
pub mod manager;
pub mod memory;
pub mod session;
pub mod store;

pub use document::{Document, Tracked};
pub use error::{DocumentError, DocumentResult, SessionError, UnitOfWorkState};
pub use manager::{DocumentManager, DocumentOptions};
pub use memory::{InMemoryDocumentDb, InMemorySession};
pub use session::{DocumentSession, NEW_DOCUMENT_VERSION, StoredDocument};
pub use store::DocumentStore;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::document::{Document, Tracked};
    pub use crate::error::{DocumentError, DocumentResult};
    pub use crate::manager::{DocumentManager, DocumentOptions};
    pub use crate::session::DocumentSession;
    pub use crate::store::DocumentStore;
}

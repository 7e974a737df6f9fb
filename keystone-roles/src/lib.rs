//! Role store for Keystone.
//!
//! All roles live in one [`RolesDocument`], read through the document cache
//! and written through a unit of work. Role names are matched
//! case-insensitively after trimming.
//!
//! ```no_run
//! use keystone_cache::{DocumentCache, GatewayMessageBus, InMemoryBackend, InMemoryGateway};
//! use keystone_documents::{DocumentStore, InMemoryDocumentDb};
//! use keystone_roles::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), RoleError> {
//! let gateway = Arc::new(InMemoryGateway::new(InMemoryBackend::new()));
//! let bus = Arc::new(GatewayMessageBus::new(gateway.clone()));
//! let roles = RoleStore::new(DocumentCache::builder(gateway, bus).build().await);
//!
//! let db = InMemoryDocumentDb::new();
//! let mut store = DocumentStore::new(db.session());
//! roles.create(&mut store, Role::new("Administrator")).await?;
//! store.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod role;
pub mod store;

pub use error::{RoleError, RoleResult};
pub use role::{Role, RoleClaim, RolesDocument, normalize_role_name};
pub use store::RoleStore;

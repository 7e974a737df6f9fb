//! Role store over the cached roles document.

use crate::error::{RoleError, RoleResult};
use crate::role::{Role, RolesDocument, normalize_role_name};
use keystone_cache::DocumentCache;
use keystone_documents::{DocumentManager, DocumentOptions, DocumentStore};
use std::sync::Arc;
use tracing::debug;

/// Create, update and look up roles.
///
/// Writes are scheduled on the caller's [`DocumentStore`] and take effect when
/// it commits. Reads in the same unit of work see those pending writes.
#[derive(Clone)]
pub struct RoleStore {
    documents: DocumentManager<RolesDocument>,
}

impl RoleStore {
    /// Create a store caching the roles document in `cache`.
    pub fn new(cache: Arc<DocumentCache>) -> Self {
        Self::with_options(cache, DocumentOptions::default())
    }

    /// Create a store with a custom caching policy.
    pub fn with_options(cache: Arc<DocumentCache>, options: DocumentOptions) -> Self {
        Self {
            documents: DocumentManager::with_options(cache, options),
        }
    }

    /// Add a new role.
    pub async fn create(&self, store: &mut DocumentStore, role: Role) -> RoleResult<()> {
        let role = validated(role)?;
        let document = self.documents.get_or_create_mutable(store).await?;

        let name = role.name.clone();
        if !document.write().insert(role) {
            return Err(RoleError::Duplicate(name));
        }

        debug!(role = %name, "Role created");
        self.documents.update(store, &document).await?;
        Ok(())
    }

    /// Replace the role with the same normalized name.
    pub async fn update(&self, store: &mut DocumentStore, role: Role) -> RoleResult<()> {
        let role = validated(role)?;
        let document = self.documents.get_or_create_mutable(store).await?;

        let name = role.name.clone();
        if !document.write().replace(role) {
            return Err(RoleError::NotFound(name));
        }

        debug!(role = %name, "Role updated");
        self.documents.update(store, &document).await?;
        Ok(())
    }

    /// Remove a role by name.
    pub async fn delete(&self, store: &mut DocumentStore, name: &str) -> RoleResult<Role> {
        let document = self.documents.get_or_create_mutable(store).await?;

        let removed = document.write().remove(&normalize_role_name(name));
        let Some(role) = removed else {
            return Err(RoleError::NotFound(name.to_string()));
        };

        debug!(role = %role.name, "Role deleted");
        self.documents.update(store, &document).await?;
        Ok(role)
    }

    /// Find a role by any spelling of its name.
    pub async fn find_by_name(&self, store: &mut DocumentStore, name: &str) -> RoleResult<Option<Role>> {
        let roles = self.documents.get_or_create_immutable(store).await?;
        Ok(roles.find(name).cloned())
    }

    /// All roles, in creation order.
    pub async fn list(&self, store: &mut DocumentStore) -> RoleResult<Vec<Role>> {
        Ok(self.documents.get_or_create_immutable(store).await?.roles)
    }

    /// Names of all roles.
    pub async fn role_names(&self, store: &mut DocumentStore) -> RoleResult<Vec<String>> {
        let roles = self.list(store).await?;
        Ok(roles.into_iter().map(|r| r.name).collect())
    }
}

fn validated(mut role: Role) -> RoleResult<Role> {
    role.name = role.name.trim().to_string();
    if role.name.is_empty() {
        return Err(RoleError::InvalidName);
    }
    role.normalized_name = normalize_role_name(&role.name);
    Ok(role)
}

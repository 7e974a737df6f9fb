//! Role model and the document that stores every role.

use keystone_documents::Document;
use serde::{Deserialize, Serialize};

/// Claim granted to every member of a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleClaim {
    pub claim_type: String,
    pub claim_value: String,
}

impl RoleClaim {
    pub fn new(claim_type: impl Into<String>, claim_value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            claim_value: claim_value.into(),
        }
    }
}

/// A named role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Display name.
    pub name: String,
    /// Lookup key; see [`normalize_role_name`].
    pub normalized_name: String,
    /// Claims granted by this role.
    #[serde(default)]
    pub claims: Vec<RoleClaim>,
}

impl Role {
    /// Create a role without claims.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            normalized_name: normalize_role_name(&name),
            name,
            claims: Vec::new(),
        }
    }

    /// Add a claim, ignoring duplicates.
    pub fn with_claim(mut self, claim: RoleClaim) -> Self {
        if !self.claims.contains(&claim) {
            self.claims.push(claim);
        }
        self
    }

    /// Whether the role grants a claim.
    pub fn has_claim(&self, claim_type: &str, claim_value: &str) -> bool {
        self.claims
            .iter()
            .any(|c| c.claim_type == claim_type && c.claim_value == claim_value)
    }
}

/// Every role of the system, persisted as a single document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolesDocument {
    pub roles: Vec<Role>,
}

impl RolesDocument {
    /// Find a role by any spelling of its name.
    pub fn find(&self, name: &str) -> Option<&Role> {
        let normalized = normalize_role_name(name);
        self.roles.iter().find(|r| r.normalized_name == normalized)
    }

    fn position(&self, normalized: &str) -> Option<usize> {
        self.roles
            .iter()
            .position(|r| r.normalized_name == normalized)
    }

    pub(crate) fn insert(&mut self, role: Role) -> bool {
        if self.position(&role.normalized_name).is_some() {
            return false;
        }
        self.roles.push(role);
        true
    }

    pub(crate) fn replace(&mut self, role: Role) -> bool {
        match self.position(&role.normalized_name) {
            Some(index) => {
                self.roles[index] = role;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, normalized: &str) -> Option<Role> {
        self.position(normalized).map(|index| self.roles.remove(index))
    }
}

impl Document for RolesDocument {}

/// Canonical form of a role name used for lookups and uniqueness.
pub fn normalize_role_name(name: &str) -> String {
    name.trim().to_uppercase()
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult};

use crate::{PermissionSet, ResourcePermission, RolePermission};

/// Normalize a role name: trimmed, upper-cased, non-empty.
pub fn normalize_role_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("role name cannot be empty"));
    }
    Ok(name.to_uppercase())
}

/// Role used for RBAC.
///
/// A role carries its grant rows keyed by permission. A row with
/// `granted = false` is an explicit revocation and contributes nothing to the
/// resolved permission set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    name: String,
    pub description: Option<String>,
    grants: BTreeMap<ResourcePermission, bool>,
}

impl Role {
    pub fn new(name: &str) -> DomainResult<Self> {
        Ok(Self {
            name: normalize_role_name(name)?,
            description: None,
            grants: BTreeMap::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        let trimmed = description.trim();
        self.description = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upsert the grant row for `permission`.
    pub fn set_grant(&mut self, permission: ResourcePermission, granted: bool) {
        self.grants.insert(permission, granted);
    }

    /// Grant state of a permission; `None` when it was never assigned.
    pub fn grant_state(&self, permission: &ResourcePermission) -> Option<bool> {
        self.grants.get(permission).copied()
    }

    pub fn is_granted(&self, permission: &ResourcePermission) -> bool {
        self.grant_state(permission).unwrap_or(false)
    }

    pub fn granted_permissions(&self) -> impl Iterator<Item = &ResourcePermission> {
        self.grants
            .iter()
            .filter_map(|(permission, granted)| granted.then_some(permission))
    }

    pub fn grant_rows(&self) -> impl Iterator<Item = RolePermission> + '_ {
        self.grants.iter().map(|(permission, granted)| RolePermission {
            role: self.name.clone(),
            permission: permission.clone(),
            granted: *granted,
        })
    }

    pub fn permission_set(&self) -> PermissionSet {
        self.granted_permissions().collect()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perm(s: &str) -> ResourcePermission {
        s.parse().unwrap()
    }

    #[test]
    fn role_name_is_normalized() {
        let role = Role::new(" editor ").unwrap();
        assert_eq!(role.name(), "EDITOR");
        assert!(Role::new("  ").is_err());
    }

    #[test]
    fn revoked_row_is_distinct_from_never_assigned() {
        let mut role = Role::new("EDITOR").unwrap();
        role.set_grant(perm("DATA:READ"), true);
        role.set_grant(perm("DATA:DELETE"), false);

        assert_eq!(role.grant_state(&perm("DATA:READ")), Some(true));
        assert_eq!(role.grant_state(&perm("DATA:DELETE")), Some(false));
        assert_eq!(role.grant_state(&perm("DATA:UPDATE")), None);

        let set = role.permission_set();
        assert!(set.contains("DATA", "READ"));
        assert!(!set.contains("DATA", "DELETE"));
        assert_eq!(role.grant_rows().count(), 2);
    }

    #[test]
    fn blank_description_is_dropped() {
        let role = Role::new("viewer").unwrap().with_description("   ");
        assert_eq!(role.description, None);
    }
}

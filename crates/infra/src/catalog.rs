//! Permission catalog: which (resource, action) pairs exist and which roles
//! are granted them.

use std::sync::Arc;

use tracing::{debug, info};

use warden_auth::{
    AccessValidator, PermissionSet, Principal, ResourcePermission, normalize_role_name,
    user::normalize_username,
};
use warden_core::DomainError;

use crate::cache::PermissionCache;
use crate::error::ServiceResult;
use crate::store::{PermissionRepository, RoleRepository, UserRepository};

pub struct PermissionCatalog {
    permissions: Arc<dyn PermissionRepository>,
    roles: Arc<dyn RoleRepository>,
    users: Arc<dyn UserRepository>,
    cache: PermissionCache,
}

impl PermissionCatalog {
    pub fn new(
        permissions: Arc<dyn PermissionRepository>,
        roles: Arc<dyn RoleRepository>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            permissions,
            roles,
            users,
            cache: PermissionCache::new(),
        }
    }

    /// Idempotent: an existing pair is left untouched. `true` if created.
    pub async fn register_permission(&self, resource: &str, action: &str) -> ServiceResult<bool> {
        let permission = ResourcePermission::parse_parts(resource, action)?;
        let created = self.permissions.register(&permission).await?;
        if created {
            info!(permission = %permission, "registered permission");
        }
        Ok(created)
    }

    pub async fn list_permissions(&self) -> ServiceResult<Vec<ResourcePermission>> {
        Ok(self.permissions.list().await?)
    }

    pub async fn grant_to_role(&self, role: &str, resource: &str, action: &str) -> ServiceResult<()> {
        self.set_grant(role, resource, action, true).await
    }

    /// Keeps the row with `granted = false`, distinct from never granted.
    pub async fn revoke_from_role(
        &self,
        role: &str,
        resource: &str,
        action: &str,
    ) -> ServiceResult<()> {
        self.set_grant(role, resource, action, false).await
    }

    async fn set_grant(
        &self,
        role: &str,
        resource: &str,
        action: &str,
        granted: bool,
    ) -> ServiceResult<()> {
        let role = normalize_role_name(role)?;
        let permission = ResourcePermission::parse_parts(resource, action)?;

        if !self.permissions.exists(&permission).await? {
            return Err(DomainError::missing("permission", permission.name()).into());
        }
        if !self.roles.set_grant(&role, &permission, granted).await? {
            return Err(DomainError::missing("role", role).into());
        }

        self.invalidate_role(&role).await?;
        info!(role = %role, permission = %permission, granted, "role grant updated");
        Ok(())
    }

    /// Union of the granted permissions of every role `username` holds.
    pub async fn find_granted_for(&self, username: &str) -> ServiceResult<PermissionSet> {
        let username = normalize_username(username);
        if let Some(cached) = self.cache.user(&username) {
            return Ok(cached);
        }

        let generation = self.cache.generation();
        let user = self
            .users
            .find_by_username(&username)
            .await?
            .ok_or_else(|| DomainError::missing("user", username.clone()))?;

        let mut granted = PermissionSet::new();
        for role in &user.roles {
            granted.extend(&self.role_permissions(role, generation).await?);
        }

        self.cache.store_user(generation, &username, granted.clone());
        Ok(granted)
    }

    async fn role_permissions(&self, role: &str, generation: u64) -> ServiceResult<PermissionSet> {
        if let Some(cached) = self.cache.role(role) {
            return Ok(cached);
        }
        let set = match self.roles.find(role).await? {
            Some(role) => role.permission_set(),
            None => {
                debug!(role, "user references an unknown role");
                PermissionSet::new()
            }
        };
        self.cache.store_role(generation, role, set.clone());
        Ok(set)
    }

    /// Drop cached views of `role` and of every user holding it.
    pub async fn invalidate_role(&self, role: &str) -> ServiceResult<()> {
        let holders = self.users.usernames_with_role(role).await?;
        self.cache.invalidate_role(role, &holders);
        Ok(())
    }

    pub fn invalidate_user(&self, username: &str) {
        self.cache.invalidate_user(&normalize_username(username));
    }
}

/// Validator answering from a fresh catalog lookup instead of the token.
#[derive(Clone)]
pub struct CatalogValidator {
    catalog: Arc<PermissionCatalog>,
}

impl CatalogValidator {
    pub fn new(catalog: Arc<PermissionCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait::async_trait]
impl AccessValidator for CatalogValidator {
    async fn is_authorized(
        &self,
        principal: &Principal,
        required: &ResourcePermission,
    ) -> anyhow::Result<bool> {
        let granted = self.catalog.find_granted_for(principal.username()).await?;
        Ok(granted.contains(required.resource.as_str(), required.action.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use warden_auth::{NewUser, ResourceGuard, Role, User};

    use super::*;
    use crate::ServiceError;
    use crate::store::InMemoryStore;

    async fn setup() -> (Arc<InMemoryStore>, PermissionCatalog) {
        let store = Arc::new(InMemoryStore::new());
        let catalog = PermissionCatalog::new(store.clone(), store.clone(), store.clone());

        for action in ["READ", "UPDATE", "DELETE"] {
            catalog.register_permission("DATA", action).await.unwrap();
        }
        RoleRepository::insert(store.as_ref(), &Role::new("EDITOR").unwrap())
            .await
            .unwrap();
        let alice = User::create(
            NewUser {
                username: "alice".into(),
                email: "alice@example.com".into(),
                display_name: "Alice".into(),
                roles: vec!["EDITOR".into()],
            },
            "hash".into(),
            true,
            chrono::Utc::now(),
        )
        .unwrap();
        UserRepository::insert(store.as_ref(), &alice).await.unwrap();

        (store, catalog)
    }

    #[tokio::test]
    async fn register_permission_is_idempotent() {
        let (_, catalog) = setup().await;
        let before = catalog.list_permissions().await.unwrap();
        assert!(!catalog.register_permission("data", "read").await.unwrap());
        assert_eq!(catalog.list_permissions().await.unwrap(), before);
        assert_eq!(before.len(), 3);
    }

    #[tokio::test]
    async fn editor_scenario() {
        let (_, catalog) = setup().await;
        catalog.grant_to_role("EDITOR", "DATA", "READ").await.unwrap();
        catalog.grant_to_role("EDITOR", "DATA", "UPDATE").await.unwrap();

        let granted = catalog.find_granted_for("alice").await.unwrap();
        assert!(granted.contains("DATA", "READ"));
        assert!(granted.contains("DATA", "UPDATE"));
        assert!(!granted.contains("DATA", "DELETE"));
    }

    #[tokio::test]
    async fn grant_is_visible_immediately_after_cached_read() {
        let (_, catalog) = setup().await;
        assert!(catalog.find_granted_for("alice").await.unwrap().is_empty());

        catalog.grant_to_role("EDITOR", "DATA", "DELETE").await.unwrap();
        assert!(catalog.find_granted_for("alice").await.unwrap().contains("DATA", "DELETE"));

        catalog.revoke_from_role("EDITOR", "DATA", "DELETE").await.unwrap();
        assert!(!catalog.find_granted_for("alice").await.unwrap().contains("DATA", "DELETE"));
    }

    #[tokio::test]
    async fn revoked_row_is_kept_as_not_granted() {
        let (store, catalog) = setup().await;
        catalog.grant_to_role("EDITOR", "DATA", "READ").await.unwrap();
        catalog.revoke_from_role("EDITOR", "DATA", "READ").await.unwrap();

        let role = RoleRepository::find(store.as_ref(), "EDITOR").await.unwrap().unwrap();
        let read: ResourcePermission = "DATA:READ".parse().unwrap();
        assert_eq!(role.grant_state(&read), Some(false));
    }

    #[tokio::test]
    async fn granting_unknown_permission_is_missing() {
        let (_, catalog) = setup().await;
        let err = catalog.grant_to_role("EDITOR", "DATA", "ARCHIVE").await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::Domain(DomainError::missing("permission", "DATA:ARCHIVE"))
        );

        let err = catalog.grant_to_role("GHOST", "DATA", "READ").await.unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::missing("role", "GHOST")));
    }

    #[tokio::test]
    async fn unknown_user_is_missing() {
        let (_, catalog) = setup().await;
        let err = catalog.find_granted_for("nobody").await.unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::missing("user", "nobody")));
    }

    #[tokio::test]
    async fn catalog_validator_drives_the_guard() {
        let (_, catalog) = setup().await;
        let catalog = Arc::new(catalog);
        catalog.grant_to_role("EDITOR", "DATA", "READ").await.unwrap();

        // Token carries nothing; the catalog is the source of truth.
        let alice = Principal::new("alice", PermissionSet::new());
        let guard = ResourceGuard::new(CatalogValidator::new(catalog));

        assert!(guard.check(Some(&alice), &"DATA:READ".parse().unwrap()).await.is_ok());
        assert!(guard.check(Some(&alice), &"DATA:DELETE".parse().unwrap()).await.is_err());
    }
}

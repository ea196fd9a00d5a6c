use std::sync::Arc;

use tracing::info;

use warden_auth::{NewUser, User, normalize_role_name, user::normalize_username};
use warden_core::DomainError;

use crate::accounts::create_user;
use crate::catalog::PermissionCatalog;
use crate::error::ServiceResult;
use crate::store::UserRepository;

/// Administrative user management.
pub struct UserAdmin {
    users: Arc<dyn UserRepository>,
    catalog: Arc<PermissionCatalog>,
}

impl UserAdmin {
    pub fn new(users: Arc<dyn UserRepository>, catalog: Arc<PermissionCatalog>) -> Self {
        Self { users, catalog }
    }

    /// Create an enabled account with the requested roles.
    pub async fn create(&self, input: NewUser, password: &str) -> ServiceResult<User> {
        let user = create_user(self.users.as_ref(), input, password, true).await?;
        info!(username = user.username(), "user created");
        Ok(user)
    }

    pub async fn get(&self, username: &str) -> ServiceResult<User> {
        let username = normalize_username(username);
        self.users
            .find_by_username(&username)
            .await?
            .ok_or_else(|| DomainError::missing("user", username).into())
    }

    pub async fn list(&self) -> ServiceResult<Vec<User>> {
        Ok(self.users.list().await?)
    }

    pub async fn delete(&self, username: &str) -> ServiceResult<()> {
        let username = normalize_username(username);
        if !self.users.delete(&username).await? {
            return Err(DomainError::missing("user", username).into());
        }
        self.catalog.invalidate_user(&username);
        info!(username = %username, "user deleted");
        Ok(())
    }

    /// Clear the lock flag and the failure counter.
    pub async fn unlock(&self, username: &str) -> ServiceResult<()> {
        let username = normalize_username(username);
        if !self.users.unlock(&username).await? {
            return Err(DomainError::missing("user", username).into());
        }
        info!(username = %username, "account unlocked");
        Ok(())
    }

    pub async fn assign_role(&self, username: &str, role: &str) -> ServiceResult<()> {
        let username = normalize_username(username);
        let role = normalize_role_name(role)?;
        if !self.users.add_role(&username, &role).await? {
            return Err(DomainError::missing("user", username).into());
        }
        self.catalog.invalidate_user(&username);
        info!(username = %username, role = %role, "role assigned");
        Ok(())
    }

    pub async fn unassign_role(&self, username: &str, role: &str) -> ServiceResult<()> {
        let username = normalize_username(username);
        let role = normalize_role_name(role)?;
        if !self.users.remove_role(&username, &role).await? {
            return Err(DomainError::missing("user", username).into());
        }
        self.catalog.invalidate_user(&username);
        info!(username = %username, role = %role, "role unassigned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use warden_auth::Role;

    use super::*;
    use crate::ServiceError;
    use crate::store::{InMemoryStore, RoleRepository};

    async fn setup() -> (Arc<PermissionCatalog>, UserAdmin) {
        let store = Arc::new(InMemoryStore::new());
        let catalog = Arc::new(PermissionCatalog::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        catalog.register_permission("DATA", "READ").await.unwrap();
        RoleRepository::insert(store.as_ref(), &Role::new("READER").unwrap())
            .await
            .unwrap();
        catalog.grant_to_role("READER", "DATA", "READ").await.unwrap();

        let admin = UserAdmin::new(store, catalog.clone());
        admin
            .create(
                NewUser {
                    username: "erin".into(),
                    email: "erin@example.com".into(),
                    display_name: "Erin".into(),
                    roles: vec![],
                },
                "erin-password",
            )
            .await
            .unwrap();
        (catalog, admin)
    }

    #[tokio::test]
    async fn role_assignment_is_visible_to_cached_lookups() {
        let (catalog, admin) = setup().await;
        assert!(catalog.find_granted_for("erin").await.unwrap().is_empty());

        admin.assign_role("erin", "reader").await.unwrap();
        assert!(catalog.find_granted_for("erin").await.unwrap().contains("DATA", "READ"));

        admin.unassign_role("erin", "READER").await.unwrap();
        assert!(catalog.find_granted_for("erin").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn assigning_unknown_role_is_missing() {
        let (_, admin) = setup().await;
        let err = admin.assign_role("erin", "ghost").await.unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::missing("role", "GHOST")));
    }

    #[tokio::test]
    async fn admin_created_user_is_enabled() {
        let (_, admin) = setup().await;
        assert!(admin.get("ERIN").await.unwrap().enabled);
        assert_eq!(admin.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_then_get_is_missing() {
        let (_, admin) = setup().await;
        admin.delete("erin").await.unwrap();
        let err = admin.get("erin").await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(ref e) if e.is_missing()));
        assert!(admin.delete("erin").await.is_err());
    }
}

use std::sync::Arc;

use tracing::info;

use warden_auth::{Role, normalize_role_name};
use warden_core::DomainError;

use crate::catalog::PermissionCatalog;
use crate::error::ServiceResult;
use crate::store::RoleRepository;

/// Role management. Grants go through [`PermissionCatalog`].
pub struct RoleService {
    roles: Arc<dyn RoleRepository>,
    catalog: Arc<PermissionCatalog>,
}

impl RoleService {
    pub fn new(roles: Arc<dyn RoleRepository>, catalog: Arc<PermissionCatalog>) -> Self {
        Self { roles, catalog }
    }

    pub async fn create(&self, name: &str, description: Option<&str>) -> ServiceResult<Role> {
        let mut role = Role::new(name)?;
        if let Some(description) = description {
            role = role.with_description(description);
        }
        self.roles.insert(&role).await?;
        info!(role = role.name(), "role created");
        Ok(role)
    }

    pub async fn get(&self, name: &str) -> ServiceResult<Role> {
        let name = normalize_role_name(name)?;
        self.roles
            .find(&name)
            .await?
            .ok_or_else(|| DomainError::missing("role", name).into())
    }

    pub async fn list(&self) -> ServiceResult<Vec<Role>> {
        Ok(self.roles.list().await?)
    }

    pub async fn update_description(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> ServiceResult<()> {
        let name = normalize_role_name(name)?;
        if !self.roles.set_description(&name, description).await? {
            return Err(DomainError::missing("role", name).into());
        }
        Ok(())
    }

    /// Rejected with a conflict while any user holds the role.
    pub async fn delete(&self, name: &str) -> ServiceResult<()> {
        let name = normalize_role_name(name)?;
        if !self.roles.delete(&name).await? {
            return Err(DomainError::missing("role", name).into());
        }
        self.catalog.invalidate_role(&name).await?;
        info!(role = %name, "role deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use warden_auth::{NewUser, User};

    use super::*;
    use crate::ServiceError;
    use crate::store::{InMemoryStore, UserRepository};

    fn service() -> (Arc<InMemoryStore>, RoleService) {
        let store = Arc::new(InMemoryStore::new());
        let catalog = Arc::new(PermissionCatalog::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        (store.clone(), RoleService::new(store, catalog))
    }

    #[tokio::test]
    async fn create_normalizes_and_rejects_duplicates() {
        let (_, roles) = service();
        let role = roles.create(" editor ", Some("edits data")).await.unwrap();
        assert_eq!(role.name(), "EDITOR");

        let err = roles.create("EDITOR", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn description_can_be_updated_and_cleared() {
        let (_, roles) = service();
        roles.create("EDITOR", Some("edits data")).await.unwrap();

        roles.update_description("editor", Some("edits everything")).await.unwrap();
        assert_eq!(roles.get("EDITOR").await.unwrap().description.as_deref(), Some("edits everything"));

        roles.update_description("EDITOR", None).await.unwrap();
        assert!(roles.get("EDITOR").await.unwrap().description.is_none());

        let err = roles.update_description("GHOST", None).await.unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::missing("role", "GHOST")));
    }

    #[tokio::test]
    async fn held_role_cannot_be_deleted() {
        let (store, roles) = service();
        roles.create("EDITOR", None).await.unwrap();
        let user = User::create(
            NewUser {
                username: "alice".into(),
                email: "alice@example.com".into(),
                display_name: "Alice".into(),
                roles: vec!["EDITOR".into()],
            },
            "hash".into(),
            true,
            Utc::now(),
        )
        .unwrap();
        UserRepository::insert(store.as_ref(), &user).await.unwrap();

        let err = roles.delete("EDITOR").await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));

        store.remove_role("alice", "EDITOR").await.unwrap();
        roles.delete("EDITOR").await.unwrap();
        assert!(roles.list().await.unwrap().is_empty());
    }
}

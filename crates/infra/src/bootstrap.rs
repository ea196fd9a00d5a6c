//! Built-in resources, the administrator role and an optional admin account.

use std::sync::Arc;

use tracing::info;

use warden_auth::{NewUser, Role, user::normalize_username};
use warden_core::DomainError;

use crate::catalog::PermissionCatalog;
use crate::error::{ServiceError, ServiceResult};
use crate::store::{RoleRepository, UserRepository};
use crate::users::UserAdmin;

pub const BUILTIN_RESOURCES: [&str; 3] = ["ROLE", "USER", "PERMISSION"];
pub const BUILTIN_ACTIONS: [&str; 5] = ["CREATE", "READ", "UPDATE", "DELETE", "VIEW"];
pub const ADMIN_ROLE: &str = "ADMIN";

/// Account created on first start when configured.
#[derive(Debug, Clone)]
pub struct AdminAccount {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub struct Bootstrap {
    catalog: Arc<PermissionCatalog>,
    roles: Arc<dyn RoleRepository>,
    users: Arc<dyn UserRepository>,
    admin: Arc<UserAdmin>,
}

impl Bootstrap {
    pub fn new(
        catalog: Arc<PermissionCatalog>,
        roles: Arc<dyn RoleRepository>,
        users: Arc<dyn UserRepository>,
        admin: Arc<UserAdmin>,
    ) -> Self {
        Self {
            catalog,
            roles,
            users,
            admin,
        }
    }

    /// Safe to run on every start.
    ///
    /// ADMIN receives every built-in permission when the role is created, and
    /// afterwards only permissions registered by this run, so revocations made
    /// by an operator survive restarts.
    pub async fn run(&self, account: Option<&AdminAccount>) -> ServiceResult<()> {
        let mut registered = Vec::new();
        for resource in BUILTIN_RESOURCES {
            for action in BUILTIN_ACTIONS {
                if self.catalog.register_permission(resource, action).await? {
                    registered.push((resource, action));
                }
            }
        }

        let grants: Vec<(&str, &str)> = if self.ensure_admin_role().await? {
            BUILTIN_RESOURCES
                .iter()
                .flat_map(|r| BUILTIN_ACTIONS.iter().map(move |a| (*r, *a)))
                .collect()
        } else {
            registered.clone()
        };
        for (resource, action) in &grants {
            self.catalog.grant_to_role(ADMIN_ROLE, resource, action).await?;
        }
        info!(
            registered = registered.len(),
            granted = grants.len(),
            "built-in permissions ready"
        );

        if let Some(account) = account {
            self.ensure_admin_user(account).await?;
        }
        Ok(())
    }

    /// `true` when the role was created by this call.
    async fn ensure_admin_role(&self) -> ServiceResult<bool> {
        let role = Role::new(ADMIN_ROLE)?.with_description("Full access to account administration");
        match self.roles.insert(&role).await {
            Ok(()) => {
                info!(role = ADMIN_ROLE, "created administrator role");
                Ok(true)
            }
            Err(err) => match ServiceError::from(err) {
                ServiceError::Domain(DomainError::Conflict(_)) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn ensure_admin_user(&self, account: &AdminAccount) -> ServiceResult<()> {
        let username = normalize_username(&account.username);
        if self.users.exists_by_username(&username).await? {
            return Ok(());
        }

        self.admin
            .create(
                NewUser {
                    username: username.clone(),
                    email: account.email.clone(),
                    display_name: "Administrator".into(),
                    roles: vec![ADMIN_ROLE.into()],
                },
                &account.password,
            )
            .await?;
        info!(username = %username, "created administrator account");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn bootstrap(store: Arc<InMemoryStore>) -> (Arc<PermissionCatalog>, Bootstrap) {
        let catalog = Arc::new(PermissionCatalog::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        let admin = Arc::new(UserAdmin::new(store.clone(), catalog.clone()));
        (
            catalog.clone(),
            Bootstrap::new(catalog, store.clone(), store, admin),
        )
    }

    fn account() -> AdminAccount {
        AdminAccount {
            username: "root".into(),
            email: "root@example.com".into(),
            password: "root-password".into(),
        }
    }

    #[tokio::test]
    async fn admin_holds_every_builtin_permission() {
        let store = Arc::new(InMemoryStore::new());
        let (catalog, boot) = bootstrap(store);
        boot.run(Some(&account())).await.unwrap();

        assert_eq!(catalog.list_permissions().await.unwrap().len(), 15);
        let granted = catalog.find_granted_for("root").await.unwrap();
        for resource in BUILTIN_RESOURCES {
            for action in BUILTIN_ACTIONS {
                assert!(granted.contains(resource, action), "{resource}:{action}");
            }
        }
    }

    #[tokio::test]
    async fn running_twice_is_harmless() {
        let store = Arc::new(InMemoryStore::new());
        let (catalog, boot) = bootstrap(store.clone());
        boot.run(Some(&account())).await.unwrap();
        boot.run(Some(&account())).await.unwrap();

        assert_eq!(catalog.list_permissions().await.unwrap().len(), 15);
        assert_eq!(UserRepository::list(store.as_ref()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restart_keeps_an_operator_revocation() {
        let store = Arc::new(InMemoryStore::new());
        let (catalog, boot) = bootstrap(store);
        boot.run(Some(&account())).await.unwrap();

        catalog.revoke_from_role(ADMIN_ROLE, "USER", "DELETE").await.unwrap();
        boot.run(Some(&account())).await.unwrap();

        let granted = catalog.find_granted_for("root").await.unwrap();
        assert!(!granted.contains("USER", "DELETE"));
        assert!(granted.contains("USER", "READ"));
    }
}

//! Service wiring: picks the store backend and builds every service on top.

use std::sync::Arc;

use tracing::info;

use warden_auth::{
    AccessValidator, IssuerSettings, TokenCodec, TokenIssuer, TokenPermissionValidator, TokenScope,
};
use warden_infra::{
    AccountService, Authenticator, Bootstrap, CatalogValidator, InMemoryStore, LoginTracker,
    Notifier, OneTimeTokenStore, PermissionCatalog, PostgresStore, RoleService, UserAdmin,
    store::{
        LoginRegisterRepository, PermissionRepository, RoleRepository, UserRepository,
        UserTokenRepository,
    },
};

use crate::config::{AuthzSource, WardenConfig};

#[derive(Clone)]
pub struct AppServices {
    pub issuer: Arc<TokenIssuer>,
    pub catalog: Arc<PermissionCatalog>,
    pub authenticator: Arc<Authenticator>,
    pub tracker: Arc<LoginTracker>,
    pub accounts: Arc<AccountService>,
    pub roles: Arc<RoleService>,
    pub users: Arc<UserAdmin>,
    /// Reset-scope store; its purge covers every scope.
    pub purge_store: OneTimeTokenStore,
    pub validator: Arc<dyn AccessValidator>,
}

impl AppServices {
    /// Connect the configured backend, run migrations and bootstrap.
    pub async fn build(config: &WardenConfig, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        match &config.database_url {
            Some(url) => {
                let store = PostgresStore::connect(url).await?;
                store.migrate().await?;
                info!("using PostgreSQL stores");
                Self::wire(Arc::new(store), config, notifier).await
            }
            None => {
                info!("DATABASE_URL not set; using in-memory stores");
                Self::wire(Arc::new(InMemoryStore::new()), config, notifier).await
            }
        }
    }

    async fn wire<S>(
        store: Arc<S>,
        config: &WardenConfig,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self>
    where
        S: UserRepository
            + RoleRepository
            + PermissionRepository
            + LoginRegisterRepository
            + UserTokenRepository
            + 'static,
    {
        let issuer = Arc::new(TokenIssuer::new(
            TokenCodec::new(config.jwt_secret.as_bytes()),
            IssuerSettings {
                issuer: config.jwt_issuer.clone(),
                audience: config.jwt_audience.clone(),
                validity: config.jwt_validity,
            },
        ));

        let catalog = Arc::new(PermissionCatalog::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        let tracker = Arc::new(LoginTracker::new(store.clone(), store.clone(), config.lockout));
        let authenticator = Arc::new(Authenticator::new(
            store.clone(),
            tracker.clone(),
            catalog.clone(),
            issuer.clone(),
        ));

        let activations = OneTimeTokenStore::new(
            store.clone(),
            TokenScope::UserRegistered,
            config.activation_token_validity,
        );
        let resets = OneTimeTokenStore::new(
            store.clone(),
            TokenScope::PasswordReset,
            config.reset_token_validity,
        );
        let accounts = Arc::new(AccountService::new(
            store.clone(),
            activations,
            resets.clone(),
            notifier,
        ));

        let roles = Arc::new(RoleService::new(store.clone(), catalog.clone()));
        let users = Arc::new(UserAdmin::new(store.clone(), catalog.clone()));

        let validator: Arc<dyn AccessValidator> = match config.authz_source {
            AuthzSource::Token => Arc::new(TokenPermissionValidator),
            AuthzSource::Catalog => Arc::new(CatalogValidator::new(catalog.clone())),
        };

        Bootstrap::new(catalog.clone(), store.clone(), store, users.clone())
            .run(config.admin.as_ref())
            .await?;

        Ok(Self {
            issuer,
            catalog,
            authenticator,
            tracker,
            accounts,
            roles,
            users,
            purge_store: resets,
            validator,
        })
    }
}

//! Persistence ports for the auth model.
//!
//! Every port is an async, object-safe trait so services can hold
//! `Arc<dyn …>` and switch between the in-memory and PostgreSQL adapters.
//!
//! Mutations that must be atomic (failed-login counting, token consumption,
//! token redemption, token supersession) are single port calls; adapters
//! implement each as one conditional statement, one transaction or one
//! critical section.

pub mod in_memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use thiserror::Error;

use warden_auth::{
    LockoutPolicy, LoginAttemptOutcome, LoginRegister, ResourcePermission, Role, TokenError,
    TokenScope, User, UserToken,
};
use warden_core::DomainError;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Not found, conflict and validation failures detected by the store.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Result of a compare-and-set consumption.
///
/// Only `Consumed` changed anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed { username: String },
    AlreadyConsumed,
    Revoked,
    Expired,
    Missing,
}

impl ConsumeOutcome {
    /// Classify a consumption that matched no redeemable row.
    pub fn refused(found: Option<&UserToken>, now: DateTime<Utc>) -> Self {
        match found.map(|t| t.check_redeemable(now)) {
            None | Some(Err(TokenError::Missing)) => ConsumeOutcome::Missing,
            Some(Err(TokenError::Revoked)) => ConsumeOutcome::Revoked,
            Some(Err(TokenError::Expired)) => ConsumeOutcome::Expired,
            Some(Err(TokenError::Consumed)) | Some(Ok(())) => ConsumeOutcome::AlreadyConsumed,
        }
    }

    /// Owner of the consumed token, or why nothing was consumed.
    pub fn into_username(self) -> Result<String, TokenError> {
        match self {
            ConsumeOutcome::Consumed { username } => Ok(username),
            ConsumeOutcome::AlreadyConsumed => Err(TokenError::Consumed),
            ConsumeOutcome::Revoked => Err(TokenError::Revoked),
            ConsumeOutcome::Expired => Err(TokenError::Expired),
            ConsumeOutcome::Missing => Err(TokenError::Missing),
        }
    }
}

/// Change applied to the token owner in the same step that consumes the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    /// Enable the account.
    Activate,
    /// Store a new hash and clear the lock flag and the failure counter.
    ResetPassword { password_hash: String },
}

#[async_trait::async_trait]
pub trait UserRepository: Send + Sync {
    /// `username` is expected normalized.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<User>, StoreError>;

    /// Fails with a conflict on a duplicate username or e-mail.
    async fn insert(&self, user: &User) -> Result<(), StoreError>;

    async fn delete(&self, username: &str) -> Result<bool, StoreError>;

    /// The remaining mutations return `false` when the user does not exist.
    async fn set_enabled(&self, username: &str, enabled: bool) -> Result<bool, StoreError>;

    async fn set_password(&self, username: &str, password_hash: &str) -> Result<bool, StoreError>;

    /// Clear the lock flag and the failure counter.
    async fn unlock(&self, username: &str) -> Result<bool, StoreError>;

    async fn add_role(&self, username: &str, role: &str) -> Result<bool, StoreError>;

    async fn remove_role(&self, username: &str, role: &str) -> Result<bool, StoreError>;

    async fn usernames_with_role(&self, role: &str) -> Result<Vec<String>, StoreError>;

    /// Atomically apply one failed login under `policy`.
    ///
    /// `None` when the user does not exist.
    async fn record_failed_login(
        &self,
        username: &str,
        policy: &LockoutPolicy,
    ) -> Result<Option<LoginAttemptOutcome>, StoreError>;

    async fn reset_login_attempts(&self, username: &str) -> Result<bool, StoreError>;
}

#[async_trait::async_trait]
pub trait RoleRepository: Send + Sync {
    async fn find(&self, name: &str) -> Result<Option<Role>, StoreError>;

    async fn list(&self) -> Result<Vec<Role>, StoreError>;

    /// Fails with a conflict when the name is taken.
    async fn insert(&self, role: &Role) -> Result<(), StoreError>;

    async fn set_description(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Fails with a conflict while any user holds the role.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    /// Upsert the grant row. `false` when the role does not exist.
    async fn set_grant(
        &self,
        name: &str,
        permission: &ResourcePermission,
        granted: bool,
    ) -> Result<bool, StoreError>;
}

#[async_trait::async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Create the pair (and its resource/action) if absent. `true` if created.
    async fn register(&self, permission: &ResourcePermission) -> Result<bool, StoreError>;

    async fn exists(&self, permission: &ResourcePermission) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<ResourcePermission>, StoreError>;
}

#[async_trait::async_trait]
pub trait LoginRegisterRepository: Send + Sync {
    async fn append(&self, entry: &LoginRegister) -> Result<(), StoreError>;

    /// Most recent entries first.
    async fn recent(&self, username: &str, limit: usize) -> Result<Vec<LoginRegister>, StoreError>;
}

#[async_trait::async_trait]
pub trait UserTokenRepository: Send + Sync {
    async fn find(&self, token: &str, scope: TokenScope) -> Result<Option<UserToken>, StoreError>;

    /// Tokens of `username` within `scope`, any state.
    async fn list_for(&self, username: &str, scope: TokenScope)
    -> Result<Vec<UserToken>, StoreError>;

    /// Revoke every non-finished token of the same (username, scope) and
    /// insert `token`, as one atomic step. Returns the number revoked.
    async fn insert_superseding(
        &self,
        token: &UserToken,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Compare-and-set `consumed` from false to true, only for a token that
    /// is neither revoked nor expired at `now`.
    async fn mark_consumed(
        &self,
        token: &str,
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// Consume `token` and apply `redemption` to its owner as one atomic step.
    ///
    /// Nothing changes unless the outcome is `Consumed`. Fails with a missing
    /// user, leaving the token live, when the owner no longer exists.
    async fn redeem(
        &self,
        token: &str,
        scope: TokenScope,
        now: DateTime<Utc>,
        redemption: &Redemption,
    ) -> Result<ConsumeOutcome, StoreError>;

    async fn revoke(&self, token: &str, scope: TokenScope) -> Result<bool, StoreError>;

    /// Delete consumed, revoked and expired tokens of every scope.
    async fn purge_finished(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

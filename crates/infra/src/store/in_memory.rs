use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use warden_auth::{
    LockoutPolicy, LoginAttemptOutcome, LoginRegister, ResourcePermission, Role, TokenScope, User,
    UserToken,
};
use warden_core::DomainError;

use super::{
    ConsumeOutcome, LoginRegisterRepository, PermissionRepository, Redemption, RoleRepository,
    StoreError, UserRepository, UserTokenRepository,
};

type TokenKey = (String, TokenScope);

/// In-memory implementation of every store port.
///
/// Intended for tests/dev. Each table sits behind its own `RwLock`; operations
/// touching two tables always lock `users` first.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, User>>,
    roles: RwLock<BTreeMap<String, Role>>,
    permissions: RwLock<BTreeSet<ResourcePermission>>,
    registers: RwLock<Vec<LoginRegister>>,
    tokens: RwLock<HashMap<TokenKey, UserToken>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
}

fn consume_entry(
    tokens: &mut HashMap<TokenKey, UserToken>,
    token: &str,
    scope: TokenScope,
    now: DateTime<Utc>,
) -> Result<ConsumeOutcome, StoreError> {
    let Some(entry) = tokens.get_mut(&(token.to_string(), scope)) else {
        return Ok(ConsumeOutcome::Missing);
    };
    if entry.check_redeemable(now).is_err() {
        return Ok(ConsumeOutcome::refused(Some(entry), now));
    }
    entry.set_consumed(true)?;
    Ok(ConsumeOutcome::Consumed {
        username: entry.username().to_string(),
    })
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate_user<F>(&self, username: &str, f: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut User),
    {
        let mut users = write(&self.users)?;
        Ok(match users.get_mut(username) {
            Some(user) => {
                f(user);
                true
            }
            None => false,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(read(&self.users)?.get(username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(read(&self.users)?
            .values()
            .find(|u| u.email() == email)
            .cloned())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError> {
        Ok(read(&self.users)?.contains_key(username))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        Ok(read(&self.users)?.values().any(|u| u.email() == email))
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = read(&self.users)?.values().cloned().collect();
        users.sort_by(|a, b| a.username().cmp(b.username()));
        Ok(users)
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut users = write(&self.users)?;
        if users.contains_key(user.username()) {
            return Err(DomainError::conflict(format!("username '{}' is taken", user.username())).into());
        }
        if users.values().any(|u| u.email() == user.email()) {
            return Err(DomainError::conflict(format!("email '{}' is taken", user.email())).into());
        }

        let roles = read(&self.roles)?;
        if let Some(missing) = user.roles.iter().find(|r| !roles.contains_key(*r)) {
            return Err(DomainError::missing("role", missing.clone()).into());
        }

        users.insert(user.username().to_string(), user.clone());
        Ok(())
    }

    async fn delete(&self, username: &str) -> Result<bool, StoreError> {
        Ok(write(&self.users)?.remove(username).is_some())
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> Result<bool, StoreError> {
        self.mutate_user(username, |u| u.enabled = enabled)
    }

    async fn set_password(&self, username: &str, password_hash: &str) -> Result<bool, StoreError> {
        self.mutate_user(username, |u| {
            u.password_hash = password_hash.to_string();
            u.credentials_non_expired = true;
        })
    }

    async fn unlock(&self, username: &str) -> Result<bool, StoreError> {
        self.mutate_user(username, User::unlock)
    }

    async fn add_role(&self, username: &str, role: &str) -> Result<bool, StoreError> {
        let mut users = write(&self.users)?;
        let Some(user) = users.get_mut(username) else {
            return Ok(false);
        };
        if !read(&self.roles)?.contains_key(role) {
            return Err(DomainError::missing("role", role).into());
        }
        user.roles.insert(role.to_string());
        Ok(true)
    }

    async fn remove_role(&self, username: &str, role: &str) -> Result<bool, StoreError> {
        self.mutate_user(username, |u| {
            u.roles.remove(role);
        })
    }

    async fn usernames_with_role(&self, role: &str) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = read(&self.users)?
            .values()
            .filter(|u| u.roles.contains(role))
            .map(|u| u.username().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn record_failed_login(
        &self,
        username: &str,
        policy: &LockoutPolicy,
    ) -> Result<Option<LoginAttemptOutcome>, StoreError> {
        let mut users = write(&self.users)?;
        let Some(user) = users.get_mut(username) else {
            return Ok(None);
        };

        let outcome = policy.on_failure(user.login_attempts, !user.account_non_locked);
        user.login_attempts = outcome.login_attempts;
        user.account_non_locked = !outcome.locked;
        Ok(Some(outcome))
    }

    async fn reset_login_attempts(&self, username: &str) -> Result<bool, StoreError> {
        self.mutate_user(username, |u| u.login_attempts = 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl RoleRepository for InMemoryStore {
    async fn find(&self, name: &str) -> Result<Option<Role>, StoreError> {
        Ok(read(&self.roles)?.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<Role>, StoreError> {
        Ok(read(&self.roles)?.values().cloned().collect())
    }

    async fn insert(&self, role: &Role) -> Result<(), StoreError> {
        let mut roles = write(&self.roles)?;
        if roles.contains_key(role.name()) {
            return Err(DomainError::conflict(format!("role '{}' already exists", role.name())).into());
        }
        roles.insert(role.name().to_string(), role.clone());
        Ok(())
    }

    async fn set_description(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut roles = write(&self.roles)?;
        Ok(match roles.get_mut(name) {
            Some(role) => {
                role.description = description.map(str::to_string);
                true
            }
            None => false,
        })
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let users = read(&self.users)?;
        let mut roles = write(&self.roles)?;
        if !roles.contains_key(name) {
            return Ok(false);
        }
        if users.values().any(|u| u.roles.contains(name)) {
            return Err(DomainError::conflict(format!("role '{name}' is still assigned")).into());
        }
        roles.remove(name);
        Ok(true)
    }

    async fn set_grant(
        &self,
        name: &str,
        permission: &ResourcePermission,
        granted: bool,
    ) -> Result<bool, StoreError> {
        let mut roles = write(&self.roles)?;
        Ok(match roles.get_mut(name) {
            Some(role) => {
                role.set_grant(permission.clone(), granted);
                true
            }
            None => false,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissions / login audit
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl PermissionRepository for InMemoryStore {
    async fn register(&self, permission: &ResourcePermission) -> Result<bool, StoreError> {
        Ok(write(&self.permissions)?.insert(permission.clone()))
    }

    async fn exists(&self, permission: &ResourcePermission) -> Result<bool, StoreError> {
        Ok(read(&self.permissions)?.contains(permission))
    }

    async fn list(&self) -> Result<Vec<ResourcePermission>, StoreError> {
        Ok(read(&self.permissions)?.iter().cloned().collect())
    }
}

#[async_trait::async_trait]
impl LoginRegisterRepository for InMemoryStore {
    async fn append(&self, entry: &LoginRegister) -> Result<(), StoreError> {
        write(&self.registers)?.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, username: &str, limit: usize) -> Result<Vec<LoginRegister>, StoreError> {
        Ok(read(&self.registers)?
            .iter()
            .rev()
            .filter(|e| e.username() == username)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One-time tokens
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl UserTokenRepository for InMemoryStore {
    async fn find(&self, token: &str, scope: TokenScope) -> Result<Option<UserToken>, StoreError> {
        Ok(read(&self.tokens)?
            .get(&(token.to_string(), scope))
            .cloned())
    }

    async fn list_for(
        &self,
        username: &str,
        scope: TokenScope,
    ) -> Result<Vec<UserToken>, StoreError> {
        let mut tokens: Vec<UserToken> = read(&self.tokens)?
            .values()
            .filter(|t| t.username() == username && t.scope() == scope)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.creation_date());
        Ok(tokens)
    }

    async fn insert_superseding(
        &self,
        token: &UserToken,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tokens = write(&self.tokens)?;
        let key = (token.token().to_string(), token.scope());
        if tokens.contains_key(&key) {
            return Err(DomainError::conflict("token value already in use").into());
        }

        let mut revoked = 0;
        for live in tokens.values_mut().filter(|t| {
            t.username() == token.username() && t.scope() == token.scope() && !t.is_finished_at(now)
        }) {
            live.set_revoked(true)?;
            revoked += 1;
        }

        tokens.insert(key, token.clone());
        Ok(revoked)
    }

    async fn mark_consumed(
        &self,
        token: &str,
        scope: TokenScope,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut tokens = write(&self.tokens)?;
        consume_entry(&mut tokens, token, scope, now)
    }

    async fn redeem(
        &self,
        token: &str,
        scope: TokenScope,
        now: DateTime<Utc>,
        redemption: &Redemption,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut users = write(&self.users)?;
        let mut tokens = write(&self.tokens)?;

        let key = (token.to_string(), scope);
        let Some(entry) = tokens.get(&key) else {
            return Ok(ConsumeOutcome::Missing);
        };
        if entry.check_redeemable(now).is_err() {
            return Ok(ConsumeOutcome::refused(Some(entry), now));
        }
        let Some(user) = users.get_mut(entry.username()) else {
            return Err(DomainError::missing("user", entry.username()).into());
        };

        match redemption {
            Redemption::Activate => user.enabled = true,
            Redemption::ResetPassword { password_hash } => {
                user.password_hash = password_hash.clone();
                user.credentials_non_expired = true;
                user.unlock();
            }
        }
        consume_entry(&mut tokens, token, scope, now)
    }

    async fn revoke(&self, token: &str, scope: TokenScope) -> Result<bool, StoreError> {
        let mut tokens = write(&self.tokens)?;
        match tokens.get_mut(&(token.to_string(), scope)) {
            Some(entry) => {
                entry.set_revoked(true)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge_finished(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tokens = write(&self.tokens)?;
        let before = tokens.len();
        tokens.retain(|_, t| !t.is_finished_at(now));
        Ok((before - tokens.len()) as u64)
    }
}

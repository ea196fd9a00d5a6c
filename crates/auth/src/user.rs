//! User accounts and the login audit trail.
//!
//! Usernames and e-mails are normalized when a user is built, so every lookup
//! can be case-insensitive without relying on storage collation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::{DomainError, DomainResult, UserId};

use crate::roles::normalize_role_name;

// ─────────────────────────────────────────────────────────────────────────────
// Normalization
// ─────────────────────────────────────────────────────────────────────────────

pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

// ─────────────────────────────────────────────────────────────────────────────
// Account status
// ─────────────────────────────────────────────────────────────────────────────

/// Why an account can or cannot authenticate.
///
/// Only used server-side (logs, admin views); callers of the login flow never
/// see which of these applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Disabled,
    Locked,
    Expired,
    CredentialsExpired,
}

impl core::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            AccountStatus::Active => "active",
            AccountStatus::Disabled => "disabled",
            AccountStatus::Locked => "locked",
            AccountStatus::Expired => "expired",
            AccountStatus::CredentialsExpired => "credentials_expired",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// Input for creating a user. Normalized and validated by [`User::create`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// User account.
///
/// # Invariants
/// - `username` and `email` are trimmed and lower-cased.
/// - `display_name` is trimmed and non-empty.
/// - `roles` holds normalized role names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    username: String,
    email: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub enabled: bool,
    pub account_non_expired: bool,
    pub account_non_locked: bool,
    pub credentials_non_expired: bool,
    pub login_attempts: u32,
    pub roles: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a validated user from `input`.
    ///
    /// The account starts enabled only when `enabled` is set (administrative
    /// creation); self-registered accounts wait for activation.
    pub fn create(
        input: NewUser,
        password_hash: String,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let username = normalize_username(&input.username);
        if username.is_empty() {
            return Err(DomainError::validation("username cannot be empty"));
        }
        if username.chars().any(char::is_whitespace) {
            return Err(DomainError::invalid_field("username", &username));
        }

        let email = normalize_email(&input.email);
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }

        let display_name = input.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(DomainError::validation("display name cannot be empty"));
        }

        let roles = input
            .roles
            .iter()
            .map(|r| normalize_role_name(r))
            .collect::<DomainResult<BTreeSet<_>>>()?;

        Ok(Self {
            id: UserId::new(),
            username,
            email,
            display_name,
            password_hash,
            enabled,
            account_non_expired: true,
            account_non_locked: true,
            credentials_non_expired: true,
            login_attempts: 0,
            roles,
            created_at: now,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn status(&self) -> AccountStatus {
        if !self.enabled {
            AccountStatus::Disabled
        } else if !self.account_non_locked {
            AccountStatus::Locked
        } else if !self.account_non_expired {
            AccountStatus::Expired
        } else if !self.credentials_non_expired {
            AccountStatus::CredentialsExpired
        } else {
            AccountStatus::Active
        }
    }

    pub fn can_authenticate(&self) -> bool {
        self.status() == AccountStatus::Active
    }

    pub fn has_role(&self, role: &str) -> bool {
        normalize_role_name(role).is_ok_and(|r| self.roles.contains(&r))
    }

    pub fn unlock(&mut self) {
        self.account_non_locked = true;
        self.login_attempts = 0;
    }
}

/// A user as read back from storage.
///
/// Converting into [`User`] re-applies normalization, so rows written by other
/// tools cannot break case-insensitive lookups.
#[derive(Debug, Clone)]
pub struct StoredUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub enabled: bool,
    pub account_non_expired: bool,
    pub account_non_locked: bool,
    pub credentials_non_expired: bool,
    pub login_attempts: u32,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<StoredUser> for User {
    fn from(row: StoredUser) -> Self {
        Self {
            id: row.id,
            username: normalize_username(&row.username),
            email: normalize_email(&row.email),
            display_name: row.display_name.trim().to_string(),
            password_hash: row.password_hash,
            enabled: row.enabled,
            account_non_expired: row.account_non_expired,
            account_non_locked: row.account_non_locked,
            credentials_non_expired: row.credentials_non_expired,
            login_attempts: row.login_attempts,
            roles: row
                .roles
                .iter()
                .filter_map(|r| normalize_role_name(r).ok())
                .collect(),
            created_at: row.created_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Login register
// ─────────────────────────────────────────────────────────────────────────────

/// Audit entry written for every login attempt, successful or not.
///
/// Immutable once created: fields are private and only readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRegister {
    id: Uuid,
    username: String,
    logged_in: bool,
    timestamp: DateTime<Utc>,
}

impl LoginRegister {
    pub fn new(username: &str, logged_in: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            username: normalize_username(username),
            logged_in,
            timestamp,
        }
    }

    /// Rebuild an entry read back from storage.
    pub fn restore(id: Uuid, username: String, logged_in: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            username,
            logged_in,
            timestamp,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            display_name: "  Alice Smith ".to_string(),
            roles: vec!["editor".to_string()],
        }
    }

    #[test]
    fn create_normalizes_identity_fields() {
        let user = User::create(
            new_user("  Alice ", " Alice@Example.COM "),
            "hash".into(),
            false,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(user.username(), "alice");
        assert_eq!(user.email(), "alice@example.com");
        assert_eq!(user.display_name, "Alice Smith");
        assert!(user.has_role("Editor"));
        assert_eq!(user.status(), AccountStatus::Disabled);
    }

    #[test]
    fn create_rejects_invalid_email() {
        let err = User::create(new_user("bob", "bob.example.com"), "h".into(), true, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_rejects_blank_username() {
        assert!(User::create(new_user("   ", "a@b.c"), "h".into(), true, Utc::now()).is_err());
        assert!(User::create(new_user("a b", "a@b.c"), "h".into(), true, Utc::now()).is_err());
    }

    #[test]
    fn status_reports_first_blocking_flag() {
        let mut user =
            User::create(new_user("carol", "carol@example.com"), "h".into(), true, Utc::now())
                .unwrap();
        assert!(user.can_authenticate());

        user.account_non_locked = false;
        user.login_attempts = 5;
        assert_eq!(user.status(), AccountStatus::Locked);

        user.unlock();
        assert_eq!(user.login_attempts, 0);
        user.credentials_non_expired = false;
        assert_eq!(user.status(), AccountStatus::CredentialsExpired);
    }

    #[test]
    fn login_register_normalizes_username() {
        let entry = LoginRegister::new(" Dave ", false, Utc::now());
        assert_eq!(entry.username(), "dave");
        assert!(!entry.logged_in());
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let user = User::create(new_user("erin", "erin@example.com"), "secret-hash".into(), true, Utc::now())
            .unwrap();
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}

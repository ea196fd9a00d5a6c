//! One-time tokens for account flows (activation, password reset).
//!
//! Unlike signed credentials these live in a store so they can be revoked
//! server-side and consumed exactly once.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use warden_core::{DomainError, DomainResult};

/// Purpose a one-time token was minted for. A token only redeems within its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    UserRegistered,
    PasswordReset,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::UserRegistered => "user_registered",
            TokenScope::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenScope {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_registered" => Ok(TokenScope::UserRegistered),
            "password_reset" => Ok(TokenScope::PasswordReset),
            other => Err(DomainError::invalid_field("scope", other)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token not found")]
    Missing,

    #[error("token already consumed")]
    Consumed,

    #[error("token revoked")]
    Revoked,

    #[error("token expired")]
    Expired,
}

/// Persisted one-time token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserToken {
    token: String,
    username: String,
    scope: TokenScope,
    creation_date: DateTime<Utc>,
    expiration_date: DateTime<Utc>,
    consumed: bool,
    revoked: bool,
}

impl UserToken {
    /// Fresh, live token with a random UUID value.
    pub fn issue(username: &str, scope: TokenScope, now: DateTime<Utc>, validity: Duration) -> Self {
        let now = now.trunc_subsecs(0);
        Self {
            token: Uuid::new_v4().to_string(),
            username: username.to_string(),
            scope,
            creation_date: now,
            expiration_date: now + validity,
            consumed: false,
            revoked: false,
        }
    }

    /// Rebuild from storage.
    pub fn restore(
        token: String,
        username: String,
        scope: TokenScope,
        creation_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
        consumed: bool,
        revoked: bool,
    ) -> Self {
        Self {
            token,
            username,
            scope,
            creation_date,
            expiration_date,
            consumed,
            revoked,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn scope(&self) -> TokenScope {
        self.scope
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    pub fn expiration_date(&self) -> DateTime<Utc> {
        self.expiration_date
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Monotonic: `false` after `true` is rejected.
    pub fn set_consumed(&mut self, consumed: bool) -> DomainResult<()> {
        if self.consumed && !consumed {
            return Err(DomainError::invalid_field("consumed", consumed));
        }
        self.consumed = consumed;
        Ok(())
    }

    /// Monotonic: `false` after `true` is rejected.
    pub fn set_revoked(&mut self, revoked: bool) -> DomainResult<()> {
        if self.revoked && !revoked {
            return Err(DomainError::invalid_field("revoked", revoked));
        }
        self.revoked = revoked;
        Ok(())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date <= now
    }

    /// Eligible for purge: consumed, revoked or expired.
    pub fn is_finished_at(&self, now: DateTime<Utc>) -> bool {
        self.consumed || self.revoked || self.is_expired_at(now)
    }

    /// Redeemability check, reported in the order consumed, revoked, expired.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), TokenError> {
        if self.consumed {
            return Err(TokenError::Consumed);
        }
        if self.revoked {
            return Err(TokenError::Revoked);
        }
        if self.is_expired_at(now) {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live() -> UserToken {
        UserToken::issue("bob", TokenScope::PasswordReset, Utc::now(), Duration::hours(1))
    }

    #[test]
    fn issued_token_is_live() {
        let t = live();
        assert!(Uuid::parse_str(t.token()).is_ok());
        assert!(!t.is_finished_at(Utc::now()));
        assert!(t.check_redeemable(Utc::now()).is_ok());
    }

    #[test]
    fn consumed_cannot_be_reverted() {
        let mut t = live();
        t.set_consumed(true).unwrap();
        let err = t.set_consumed(false).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidField {
                field: "consumed",
                value: "false".into()
            }
        );
        assert!(t.is_consumed());
        // Setting it again is harmless.
        t.set_consumed(true).unwrap();
    }

    #[test]
    fn revoked_cannot_be_reverted() {
        let mut t = live();
        t.set_revoked(true).unwrap();
        assert!(t.set_revoked(false).is_err());
        assert!(t.is_revoked());
    }

    #[test]
    fn redeemability_reports_consumed_before_revoked() {
        let mut t = live();
        t.set_revoked(true).unwrap();
        t.set_consumed(true).unwrap();
        assert_eq!(t.check_redeemable(Utc::now()), Err(TokenError::Consumed));
    }

    #[test]
    fn past_expiration_is_expired_and_finished() {
        let t = UserToken::issue(
            "bob",
            TokenScope::UserRegistered,
            Utc::now() - Duration::hours(2),
            Duration::hours(1),
        );
        let now = Utc::now();
        assert!(t.is_finished_at(now));
        assert_eq!(t.check_redeemable(now), Err(TokenError::Expired));
    }

    #[test]
    fn expiration_boundary_counts_as_finished() {
        let t = live();
        assert!(t.is_finished_at(t.expiration_date()));
    }

    #[test]
    fn scope_parses_its_wire_name() {
        for scope in [TokenScope::UserRegistered, TokenScope::PasswordReset] {
            assert_eq!(scope.as_str().parse::<TokenScope>().unwrap(), scope);
        }
        assert!("session".parse::<TokenScope>().is_err());
    }
}

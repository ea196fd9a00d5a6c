//! Login attempt tracking and password authentication.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use warden_auth::{
    IssuedToken, LockoutPolicy, LoginAttemptOutcome, LoginError, LoginRegister, TokenIssuer,
    user::normalize_username,
};

use crate::catalog::PermissionCatalog;
use crate::error::ServiceResult;
use crate::hashing;
use crate::store::{LoginRegisterRepository, UserRepository};

// ─────────────────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────────────────

/// Records every login attempt and drives the lockout counter.
///
/// The audit entry is always appended before the counter is touched, so a
/// failing counter update never loses the audit row.
pub struct LoginTracker {
    users: Arc<dyn UserRepository>,
    registers: Arc<dyn LoginRegisterRepository>,
    policy: LockoutPolicy,
}

impl LoginTracker {
    pub fn new(
        users: Arc<dyn UserRepository>,
        registers: Arc<dyn LoginRegisterRepository>,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            users,
            registers,
            policy,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub async fn record_success(&self, username: &str) -> ServiceResult<()> {
        self.registers
            .append(&LoginRegister::new(username, true, Utc::now()))
            .await?;

        if let Err(err) = self.users.reset_login_attempts(username).await {
            error!(username, error = %err, "failed to reset login attempts");
        }
        Ok(())
    }

    /// `None` for unknown users, or when the counter update failed.
    pub async fn record_failure(&self, username: &str) -> ServiceResult<Option<LoginAttemptOutcome>> {
        self.registers
            .append(&LoginRegister::new(username, false, Utc::now()))
            .await?;

        match self.users.record_failed_login(username, &self.policy).await {
            Ok(Some(outcome)) => {
                if outcome.newly_locked {
                    warn!(
                        username,
                        attempts = outcome.login_attempts,
                        "account locked after repeated login failures"
                    );
                }
                Ok(Some(outcome))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                error!(username, error = %err, "failed to update login attempts");
                Ok(None)
            }
        }
    }

    pub async fn recent_attempts(
        &self,
        username: &str,
        limit: usize,
    ) -> ServiceResult<Vec<LoginRegister>> {
        Ok(self
            .registers
            .recent(&normalize_username(username), limit)
            .await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authenticator
// ─────────────────────────────────────────────────────────────────────────────

/// Username/password login producing a signed credential.
pub struct Authenticator {
    users: Arc<dyn UserRepository>,
    tracker: Arc<LoginTracker>,
    catalog: Arc<PermissionCatalog>,
    issuer: Arc<TokenIssuer>,
}

impl Authenticator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tracker: Arc<LoginTracker>,
        catalog: Arc<PermissionCatalog>,
        issuer: Arc<TokenIssuer>,
    ) -> Self {
        Self {
            users,
            tracker,
            catalog,
            issuer,
        }
    }

    /// Every failure surfaces as [`LoginError::BadCredentials`]; the reason is
    /// only logged.
    pub async fn login(&self, username: &str, password: &str) -> ServiceResult<IssuedToken> {
        let username = normalize_username(username);

        let Some(user) = self.users.find_by_username(&username).await? else {
            info!(username = %username, "login for unknown user");
            self.tracker.record_failure(&username).await?;
            return Err(LoginError::BadCredentials.into());
        };

        if !user.can_authenticate() {
            info!(username = %username, status = %user.status(), "login on inactive account");
            self.tracker.record_failure(&username).await?;
            return Err(LoginError::BadCredentials.into());
        }

        if !hashing::verify(password, &user.password_hash).await? {
            info!(username = %username, "login with wrong password");
            self.tracker.record_failure(&username).await?;
            return Err(LoginError::BadCredentials.into());
        }

        // Audited as a success only once a credential exists.
        let permissions = self.catalog.find_granted_for(&username).await?;
        let issued = self.issuer.issue(&username, &permissions, Utc::now())?;
        self.tracker.record_success(&username).await?;
        info!(username = %username, jti = ?issued.data.id, "login succeeded");
        Ok(issued)
    }
}

//! Self-service account flows: registration, activation and password changes.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use warden_auth::{
    LoginError, NewUser, User,
    user::{normalize_email, normalize_username},
    validate_password,
};
use warden_core::DomainError;

use crate::error::ServiceResult;
use crate::notify::Notifier;
use crate::hashing;
use crate::store::{Redemption, UserRepository};
use crate::user_tokens::OneTimeTokenStore;

/// Validate and store a new user. Shared by registration and admin creation.
pub(crate) async fn create_user(
    users: &dyn UserRepository,
    input: NewUser,
    password: &str,
    enabled: bool,
) -> ServiceResult<User> {
    validate_password(password)?;
    let hash = hashing::hash(password).await?;
    let user = User::create(input, hash, enabled, Utc::now())?;

    if users.exists_by_username(user.username()).await? {
        return Err(DomainError::conflict(format!("username {} is taken", user.username())).into());
    }
    if users.exists_by_email(user.email()).await? {
        return Err(DomainError::conflict("email is already registered").into());
    }

    users.insert(&user).await?;
    Ok(user)
}

pub struct AccountService {
    users: Arc<dyn UserRepository>,
    activations: OneTimeTokenStore,
    resets: OneTimeTokenStore,
    notifier: Arc<dyn Notifier>,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        activations: OneTimeTokenStore,
        resets: OneTimeTokenStore,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            users,
            activations,
            resets,
            notifier,
        }
    }

    /// Store a disabled account and send its activation token.
    ///
    /// Requested roles are ignored; roles are assigned administratively.
    pub async fn register(&self, mut input: NewUser, password: &str) -> ServiceResult<User> {
        input.roles.clear();
        let user = create_user(self.users.as_ref(), input, password, false).await?;
        info!(username = user.username(), "user registered");

        let token = self.activations.generate(user.username()).await?;
        if let Err(err) = self
            .notifier
            .send_user_registered_message(user.email(), user.username(), &token)
            .await
        {
            warn!(username = user.username(), error = %err, "activation message not sent");
        }
        Ok(user)
    }

    /// Enable the token's owner. The token is consumed in the same step.
    pub async fn activate(&self, token: &str) -> ServiceResult<()> {
        let username = self.activations.redeem(token, &Redemption::Activate).await?;
        info!(username = %username, "account activated");
        Ok(())
    }

    /// Unknown addresses succeed silently.
    pub async fn request_password_reset(&self, email: &str) -> ServiceResult<()> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };

        let token = self.resets.generate(user.username()).await?;
        if let Err(err) = self
            .notifier
            .send_password_recovery_message(user.email(), user.username(), &token)
            .await
        {
            warn!(username = user.username(), error = %err, "password recovery message not sent");
        }
        Ok(())
    }

    /// Set a new password from a reset token. Also clears any lockout.
    ///
    /// The token is consumed in the same step as the update, so of several
    /// concurrent redemptions exactly one password is stored.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> ServiceResult<()> {
        validate_password(new_password)?;
        self.resets.validate(token).await?;

        let redemption = Redemption::ResetPassword {
            password_hash: hashing::hash(new_password).await?,
        };
        let username = self.resets.redeem(token, &redemption).await?;
        info!(username = %username, "password reset");
        Ok(())
    }

    pub async fn change_password(
        &self,
        username: &str,
        current: &str,
        new_password: &str,
    ) -> ServiceResult<()> {
        let username = normalize_username(username);
        let user = self
            .users
            .find_by_username(&username)
            .await?
            .ok_or_else(|| DomainError::missing("user", username.clone()))?;

        if !hashing::verify(current, &user.password_hash).await? {
            return Err(LoginError::BadCredentials.into());
        }
        validate_password(new_password)?;

        let hash = hashing::hash(new_password).await?;
        self.users.set_password(&username, &hash).await?;
        info!(username = %username, "password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use warden_auth::{PasswordError, TokenError, TokenScope, verify_password};

    use super::*;
    use crate::ServiceError;
    use crate::notify::{MessageKind, RecordingNotifier};
    use crate::store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        notifier: Arc<RecordingNotifier>,
        accounts: Arc<AccountService>,
    }

    fn fixture_with(notifier: RecordingNotifier) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(notifier);
        let accounts = Arc::new(AccountService::new(
            store.clone(),
            OneTimeTokenStore::new(store.clone(), TokenScope::UserRegistered, Duration::days(1)),
            OneTimeTokenStore::new(store.clone(), TokenScope::PasswordReset, Duration::hours(1)),
            notifier.clone(),
        ));
        Fixture {
            store,
            notifier,
            accounts,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingNotifier::new())
    }

    fn dave() -> NewUser {
        NewUser {
            username: "Dave".into(),
            email: "Dave@Example.com".into(),
            display_name: "Dave".into(),
            roles: vec!["ADMIN".into()],
        }
    }

    #[tokio::test]
    async fn registration_then_activation() {
        let f = fixture();
        let user = f.accounts.register(dave(), "s3cret-pass").await.unwrap();
        assert_eq!(user.username(), "dave");
        assert!(!user.enabled);
        assert!(user.roles.is_empty());

        let token = f
            .notifier
            .last_token(MessageKind::UserRegistered, "dave")
            .unwrap();
        f.accounts.activate(&token).await.unwrap();
        assert!(f.store.find_by_username("dave").await.unwrap().unwrap().enabled);

        assert_eq!(
            f.accounts.activate(&token).await.unwrap_err(),
            ServiceError::Token(TokenError::Consumed)
        );
    }

    #[tokio::test]
    async fn duplicate_username_or_email_conflicts() {
        let f = fixture();
        f.accounts.register(dave(), "s3cret-pass").await.unwrap();

        let err = f.accounts.register(dave(), "s3cret-pass").await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));

        let mut other = dave();
        other.username = "david".into();
        let err = f.accounts.register(other, "s3cret-pass").await.unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn short_password_is_rejected_before_storage() {
        let f = fixture();
        let err = f.accounts.register(dave(), "short").await.unwrap_err();
        assert_eq!(err, ServiceError::Password(PasswordError::TooShort));
        assert!(!f.store.exists_by_username("dave").await.unwrap());
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_registration() {
        let f = fixture_with(RecordingNotifier::failing());
        f.accounts.register(dave(), "s3cret-pass").await.unwrap();
        assert!(f.store.exists_by_username("dave").await.unwrap());
    }

    #[tokio::test]
    async fn password_reset_flow_unlocks_account() {
        let f = fixture();
        f.accounts.register(dave(), "s3cret-pass").await.unwrap();
        f.store
            .record_failed_login("dave", &Default::default())
            .await
            .unwrap();

        f.accounts.request_password_reset(" DAVE@example.com").await.unwrap();
        let token = f
            .notifier
            .last_token(MessageKind::PasswordRecovery, "dave")
            .unwrap();
        f.accounts.reset_password(&token, "another-pass").await.unwrap();

        let user = f.store.find_by_username("dave").await.unwrap().unwrap();
        assert!(verify_password("another-pass", &user.password_hash));
        assert_eq!(user.login_attempts, 0);
        assert!(user.account_non_locked);

        assert_eq!(
            f.accounts.reset_password(&token, "third-pass").await.unwrap_err(),
            ServiceError::Token(TokenError::Consumed)
        );
    }

    async fn reset_token(f: &Fixture) -> String {
        f.accounts.request_password_reset("dave@example.com").await.unwrap();
        f.notifier
            .last_token(MessageKind::PasswordRecovery, "dave")
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resets_store_only_the_winning_password() {
        let f = fixture();
        f.accounts.register(dave(), "s3cret-pass").await.unwrap();

        for round in 0..5 {
            let token = reset_token(&f).await;
            let passwords = [format!("first-pass-{round}"), format!("second-pass-{round}")];
            let handles: Vec<_> = passwords
                .iter()
                .map(|password| {
                    let accounts = f.accounts.clone();
                    let (token, password) = (token.clone(), password.clone());
                    tokio::spawn(async move { accounts.reset_password(&token, &password).await })
                })
                .collect();

            let mut winners = Vec::new();
            for (handle, password) in handles.into_iter().zip(&passwords) {
                match handle.await.unwrap() {
                    Ok(()) => winners.push(password.clone()),
                    Err(err) => assert_eq!(err, ServiceError::Token(TokenError::Consumed)),
                }
            }
            assert_eq!(winners.len(), 1, "round {round}");

            let user = f.store.find_by_username("dave").await.unwrap().unwrap();
            for password in &passwords {
                assert_eq!(
                    verify_password(password, &user.password_hash),
                    *password == winners[0],
                    "round {round}"
                );
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_activations_have_one_winner() {
        let f = fixture();
        f.accounts.register(dave(), "s3cret-pass").await.unwrap();
        let token = f
            .notifier
            .last_token(MessageKind::UserRegistered, "dave")
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let accounts = f.accounts.clone();
                let token = token.clone();
                tokio::spawn(async move { accounts.activate(&token).await })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => wins += 1,
                Err(err) => assert_eq!(err, ServiceError::Token(TokenError::Consumed)),
            }
        }
        assert_eq!(wins, 1);
        assert!(f.store.find_by_username("dave").await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn superseded_reset_token_changes_nothing() {
        let f = fixture();
        f.accounts.register(dave(), "s3cret-pass").await.unwrap();
        let first = reset_token(&f).await;
        let second = reset_token(&f).await;

        assert_eq!(
            f.accounts.reset_password(&first, "stale-pass-1").await.unwrap_err(),
            ServiceError::Token(TokenError::Revoked)
        );
        let user = f.store.find_by_username("dave").await.unwrap().unwrap();
        assert!(verify_password("s3cret-pass", &user.password_hash));

        f.accounts.reset_password(&second, "fresh-pass-1").await.unwrap();
    }

    #[tokio::test]
    async fn activation_for_a_deleted_user_is_missing() {
        let f = fixture();
        f.accounts.register(dave(), "s3cret-pass").await.unwrap();
        let token = f
            .notifier
            .last_token(MessageKind::UserRegistered, "dave")
            .unwrap();
        UserRepository::delete(f.store.as_ref(), "dave").await.unwrap();

        let err = f.accounts.activate(&token).await.unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::missing("user", "dave")));
    }

    #[tokio::test]
    async fn unknown_email_reset_is_silent() {
        let f = fixture();
        f.accounts.request_password_reset("nobody@example.com").await.unwrap();
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn change_password_requires_current_password() {
        let f = fixture();
        f.accounts.register(dave(), "s3cret-pass").await.unwrap();

        assert_eq!(
            f.accounts
                .change_password("dave", "wrong-pass", "next-pass-1")
                .await
                .unwrap_err(),
            ServiceError::Login(LoginError::BadCredentials)
        );
        f.accounts
            .change_password("dave", "s3cret-pass", "next-pass-1")
            .await
            .unwrap();
        let user = f.store.find_by_username("dave").await.unwrap().unwrap();
        assert!(verify_password("next-pass-1", &user.password_hash));
    }
}

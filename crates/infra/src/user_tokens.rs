//! One-time token store bound to a single scope.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use warden_auth::{TokenError, TokenScope, UserToken};

use crate::error::ServiceResult;
use crate::store::{Redemption, UserTokenRepository};

#[derive(Clone)]
pub struct OneTimeTokenStore {
    repo: Arc<dyn UserTokenRepository>,
    scope: TokenScope,
    validity: Duration,
}

impl OneTimeTokenStore {
    pub fn new(repo: Arc<dyn UserTokenRepository>, scope: TokenScope, validity: Duration) -> Self {
        Self {
            repo,
            scope,
            validity,
        }
    }

    pub fn scope(&self) -> TokenScope {
        self.scope
    }

    /// Mint a token for `username`, revoking any still-live one of this scope.
    pub async fn generate(&self, username: &str) -> ServiceResult<String> {
        let now = Utc::now();
        let token = UserToken::issue(username, self.scope, now, self.validity);
        let revoked = self.repo.insert_superseding(&token, now).await?;
        if revoked > 0 {
            debug!(username, scope = %self.scope, revoked, "superseded live tokens");
        }
        Ok(token.token().to_string())
    }

    pub async fn validate(&self, token: &str) -> ServiceResult<()> {
        let found = self.load(token).await?;
        found.check_redeemable(Utc::now())?;
        Ok(())
    }

    /// Compare-and-set consumption; only one concurrent caller wins.
    ///
    /// Revoked and expired tokens are refused like consumed ones.
    pub async fn consume_token(&self, token: &str) -> ServiceResult<()> {
        self.repo
            .mark_consumed(token, self.scope, Utc::now())
            .await?
            .into_username()?;
        Ok(())
    }

    /// Consume `token` and apply `redemption` to its owner atomically.
    ///
    /// Returns the owner. The change is applied only by the winning caller.
    pub async fn redeem(&self, token: &str, redemption: &Redemption) -> ServiceResult<String> {
        let outcome = self
            .repo
            .redeem(token, self.scope, Utc::now(), redemption)
            .await?;
        Ok(outcome.into_username()?)
    }

    pub async fn get_username(&self, token: &str) -> ServiceResult<String> {
        Ok(self.load(token).await?.username().to_string())
    }

    pub async fn revoke(&self, token: &str) -> ServiceResult<()> {
        if self.repo.revoke(token, self.scope).await? {
            Ok(())
        } else {
            Err(TokenError::Missing.into())
        }
    }

    /// Delete finished tokens of every scope.
    pub async fn purge_finished(&self) -> ServiceResult<u64> {
        let purged = self.repo.purge_finished(Utc::now()).await?;
        if purged > 0 {
            info!(purged, "purged finished one-time tokens");
        }
        Ok(purged)
    }

    async fn load(&self, token: &str) -> ServiceResult<UserToken> {
        Ok(self
            .repo
            .find(token, self.scope)
            .await?
            .ok_or(TokenError::Missing)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceError;
    use crate::store::InMemoryStore;

    fn reset_store(repo: Arc<InMemoryStore>) -> OneTimeTokenStore {
        OneTimeTokenStore::new(repo, TokenScope::PasswordReset, Duration::hours(1))
    }

    fn token_err(err: TokenError) -> ServiceError {
        ServiceError::Token(err)
    }

    #[tokio::test]
    async fn second_reset_token_revokes_the_first() {
        let repo = Arc::new(InMemoryStore::new());
        let store = reset_store(repo.clone());

        let first = store.generate("bob").await.unwrap();
        let second = store.generate("bob").await.unwrap();
        assert_ne!(first, second);

        assert_eq!(store.validate(&first).await.unwrap_err(), token_err(TokenError::Revoked));
        store.validate(&second).await.unwrap();

        let live = repo
            .list_for("bob", TokenScope::PasswordReset)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| !t.is_finished_at(Utc::now()))
            .count();
        assert_eq!(live, 1);
    }

    #[tokio::test]
    async fn consumption_is_one_shot() {
        let store = reset_store(Arc::new(InMemoryStore::new()));
        let token = store.generate("bob").await.unwrap();

        store.consume_token(&token).await.unwrap();
        assert_eq!(store.consume_token(&token).await.unwrap_err(), token_err(TokenError::Consumed));
        assert_eq!(store.validate(&token).await.unwrap_err(), token_err(TokenError::Consumed));
        // Lookup does not care about state.
        assert_eq!(store.get_username(&token).await.unwrap(), "bob");
    }

    #[tokio::test]
    async fn superseded_token_cannot_be_consumed() {
        let store = reset_store(Arc::new(InMemoryStore::new()));
        let first = store.generate("bob").await.unwrap();
        let second = store.generate("bob").await.unwrap();

        assert_eq!(store.consume_token(&first).await.unwrap_err(), token_err(TokenError::Revoked));
        store.consume_token(&second).await.unwrap();
    }

    #[tokio::test]
    async fn expired_token_cannot_be_consumed() {
        let store = OneTimeTokenStore::new(
            Arc::new(InMemoryStore::new()),
            TokenScope::PasswordReset,
            Duration::seconds(-1),
        );
        let token = store.generate("bob").await.unwrap();
        assert_eq!(store.consume_token(&token).await.unwrap_err(), token_err(TokenError::Expired));
    }

    #[tokio::test]
    async fn concurrent_consumption_has_exactly_one_winner() {
        let store = reset_store(Arc::new(InMemoryStore::new()));
        let token = store.generate("bob").await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let token = token.clone();
                tokio::spawn(async move { store.consume_token(&token).await })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => wins += 1,
                Err(err) => assert_eq!(err, token_err(TokenError::Consumed)),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn tokens_do_not_cross_scopes() {
        let repo = Arc::new(InMemoryStore::new());
        let resets = reset_store(repo.clone());
        let activations =
            OneTimeTokenStore::new(repo, TokenScope::UserRegistered, Duration::days(1));

        let token = activations.generate("bob").await.unwrap();
        assert_eq!(resets.validate(&token).await.unwrap_err(), token_err(TokenError::Missing));
        assert_eq!(resets.consume_token(&token).await.unwrap_err(), token_err(TokenError::Missing));

        // A reset token does not supersede the activation token.
        resets.generate("bob").await.unwrap();
        activations.validate(&token).await.unwrap();
    }

    #[tokio::test]
    async fn expired_token_fails_validation() {
        let store = OneTimeTokenStore::new(
            Arc::new(InMemoryStore::new()),
            TokenScope::PasswordReset,
            Duration::seconds(-1),
        );
        let token = store.generate("bob").await.unwrap();
        assert_eq!(store.validate(&token).await.unwrap_err(), token_err(TokenError::Expired));
        assert_eq!(store.purge_finished().await.unwrap(), 1);
        assert_eq!(store.validate(&token).await.unwrap_err(), token_err(TokenError::Missing));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = reset_store(Arc::new(InMemoryStore::new()));
        let token = store.generate("bob").await.unwrap();
        store.revoke(&token).await.unwrap();
        store.revoke(&token).await.unwrap();
        assert_eq!(store.validate(&token).await.unwrap_err(), token_err(TokenError::Revoked));
        assert_eq!(store.revoke("nope").await.unwrap_err(), token_err(TokenError::Missing));
    }
}

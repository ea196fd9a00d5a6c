//! Authorization guard for protected operations.
//!
//! The guard is explicit composition: callers hand it the operation as a
//! closure and it only calls the closure after the check passed. A denied
//! check therefore cannot produce any side effect of the operation.

use std::future::Future;

use tracing::{debug, warn};

use crate::{
    AccessValidator, AuthzError, Principal, ResourcePermission, TokenPermissionValidator,
    explain_authorization,
};

/// Error returned by [`ResourceGuard::invoke`].
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    #[error(transparent)]
    Denied(#[from] AuthzError),

    #[error("{0}")]
    Operation(E),
}

/// Guard wrapping operations tagged as requiring resource access.
#[derive(Debug, Clone, Default)]
pub struct ResourceGuard<V = TokenPermissionValidator> {
    validator: V,
}

impl<V: AccessValidator> ResourceGuard<V> {
    pub fn new(validator: V) -> Self {
        Self { validator }
    }

    /// Decide whether `principal` may perform `required`. Fails closed.
    pub async fn check(
        &self,
        principal: Option<&Principal>,
        required: &ResourcePermission,
    ) -> Result<(), AuthzError> {
        let Some(principal) = principal else {
            debug!(permission = %required, "no principal on guarded operation");
            return Err(AuthzError::Unauthenticated);
        };

        match self.validator.is_authorized(principal, required).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                let explanation = explain_authorization(principal, required);
                warn!(
                    username = principal.username(),
                    permission = %required,
                    reason = %explanation.reason,
                    "authorization denied"
                );
                Err(AuthzError::Forbidden(required.name()))
            }
            Err(err) => {
                warn!(
                    username = principal.username(),
                    permission = %required,
                    error = %err,
                    "access validator failed; denying"
                );
                Err(AuthzError::Forbidden(required.name()))
            }
        }
    }

    /// Run `op` only when `principal` holds `required`.
    pub async fn invoke<F, Fut, T, E>(
        &self,
        principal: Option<&Principal>,
        required: &ResourcePermission,
        op: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.check(principal, required).await?;
        op().await.map_err(GuardError::Operation)
    }
}

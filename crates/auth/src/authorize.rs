use serde::Serialize;
use thiserror::Error;

use crate::{Principal, ResourcePermission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// No authenticated principal is attached to the request.
    #[error("authentication required")]
    Unauthenticated,

    /// The principal is authenticated but lacks the permission.
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Decide whether `principal` holds `action` on `resource`.
///
/// - No IO
/// - No panics
/// - Absence of the pair simply means denied
pub fn is_authorized(principal: &Principal, resource: &str, action: &str) -> bool {
    principal.permissions.contains(resource, action)
}

/// Fallible form of [`is_authorized`] carrying the missing authority.
pub fn authorize(principal: &Principal, required: &ResourcePermission) -> Result<(), AuthzError> {
    if is_authorized(principal, required.resource.as_str(), required.action.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.name()))
    }
}

/// Source of authorization decisions consulted by the guard.
///
/// Implementations may answer from the token-embedded permission set or from a
/// fresh catalog query. Returning an error never grants access.
#[async_trait::async_trait]
pub trait AccessValidator: Send + Sync {
    async fn is_authorized(
        &self,
        principal: &Principal,
        required: &ResourcePermission,
    ) -> anyhow::Result<bool>;
}

#[async_trait::async_trait]
impl<T: AccessValidator + ?Sized> AccessValidator for std::sync::Arc<T> {
    async fn is_authorized(
        &self,
        principal: &Principal,
        required: &ResourcePermission,
    ) -> anyhow::Result<bool> {
        (**self).is_authorized(principal, required).await
    }
}

/// Validator answering from the permissions embedded in the principal's token.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenPermissionValidator;

#[async_trait::async_trait]
impl AccessValidator for TokenPermissionValidator {
    async fn is_authorized(
        &self,
        principal: &Principal,
        required: &ResourcePermission,
    ) -> anyhow::Result<bool> {
        Ok(is_authorized(
            principal,
            required.resource.as_str(),
            required.action.as_str(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
///
/// Written to server-side logs on denial; never returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    /// The permission that was being checked.
    pub required_permission: String,

    /// Whether the authorization was granted.
    pub granted: bool,

    /// Human-readable reason for the decision.
    pub reason: String,

    pub username: String,

    /// Canonical authorities the principal holds, sorted.
    pub effective_permissions: Vec<String>,

    /// Other actions the principal holds on the same resource, if any.
    pub same_resource_actions: Vec<String>,
}

/// Explain why an authorization decision was made (or would be made).
pub fn explain_authorization(
    principal: &Principal,
    required: &ResourcePermission,
) -> AuthorizationExplanation {
    let required_name = required.name();
    let granted = authorize(principal, required).is_ok();

    let same_resource_actions: Vec<String> = principal
        .permissions
        .actions_for(required.resource.as_str())
        .map(|actions| actions.iter().map(|a| a.to_uppercase()).collect())
        .unwrap_or_default();

    let reason = if granted {
        format!("principal holds '{required_name}'")
    } else if same_resource_actions.is_empty() {
        format!(
            "principal holds no permission on resource '{}'",
            required.resource
        )
    } else {
        format!(
            "principal lacks '{}' on resource '{}' (holds {:?})",
            required.action, required.resource, same_resource_actions
        )
    };

    AuthorizationExplanation {
        required_permission: required_name,
        granted,
        reason,
        username: principal.username().to_string(),
        effective_permissions: principal.permissions.authorities(),
        same_resource_actions,
    }
}

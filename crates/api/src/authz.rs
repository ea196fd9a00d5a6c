//! Route-level authorization built on [`ResourceGuard`].
//!
//! Each guarded route gets its own layer carrying the permission it requires;
//! a denied request never reaches the handler.

use std::sync::Arc;

use axum::{
    extract::State,
    http::Request,
    middleware::{Next, from_fn_with_state},
    response::Response,
    routing::MethodRouter,
};

use warden_auth::{AccessValidator, Principal, ResourceGuard, ResourcePermission};
use warden_core::DomainResult;

use crate::app::errors::authz_error;

pub type SharedGuard = Arc<ResourceGuard<Arc<dyn AccessValidator>>>;

#[derive(Clone)]
pub struct PermissionGate {
    guard: SharedGuard,
    required: ResourcePermission,
}

pub async fn require_permission(
    State(gate): State<PermissionGate>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let principal = req.extensions().get::<Principal>();
    match gate.guard.check(principal, &gate.required).await {
        Ok(()) => next.run(req).await,
        Err(err) => authz_error(err),
    }
}

/// Wraps method routers with [`require_permission`].
#[derive(Clone)]
pub struct Gates {
    guard: SharedGuard,
}

impl Gates {
    pub fn new(validator: Arc<dyn AccessValidator>) -> Self {
        Self {
            guard: Arc::new(ResourceGuard::new(validator)),
        }
    }

    /// Admit only principals holding `resource:action` to `route`.
    pub fn guard(&self, resource: &str, action: &str, route: MethodRouter) -> DomainResult<MethodRouter> {
        let gate = PermissionGate {
            guard: self.guard.clone(),
            required: ResourcePermission::parse_parts(resource, action)?,
        };
        Ok(route.layer(from_fn_with_state(gate, require_permission)))
    }
}

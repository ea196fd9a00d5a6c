//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store backend selection and service construction
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::authz::Gates;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router over already-wired services.
pub fn build_app(services: Arc<AppServices>) -> anyhow::Result<Router> {
    let auth_state = middleware::AuthState {
        issuer: services.issuer.clone(),
    };
    let gates = Gates::new(services.validator.clone());

    // Protected routes: bearer token first, then the per-route permission.
    let protected = routes::protected_router(&gates)?.layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Ok(routes::public_router()
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services))))
}

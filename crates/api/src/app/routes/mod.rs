use axum::{
    Router,
    routing::{delete, get, post, put},
};

use warden_core::DomainResult;

use crate::authz::Gates;

pub mod auth;
pub mod roles;
pub mod system;
pub mod users;

/// Endpoints reachable without a bearer token.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/auth/login", post(auth::login))
        .route("/auth/register", post(auth::register))
        .route("/auth/activate", post(auth::activate))
        .route("/auth/password/forgot", post(auth::forgot_password))
        .route("/auth/password/reset", post(auth::reset_password))
}

/// Endpoints requiring a valid bearer token; most also require a permission.
pub fn protected_router(gates: &Gates) -> DomainResult<Router> {
    Ok(Router::new()
        .route("/me", get(auth::me))
        .route("/auth/password/change", post(auth::change_password))
        // Roles
        .route("/roles", gates.guard("ROLE", "READ", get(roles::list_roles))?)
        .route("/roles", gates.guard("ROLE", "CREATE", post(roles::create_role))?)
        .route("/roles/:name", gates.guard("ROLE", "READ", get(roles::get_role))?)
        .route("/roles/:name", gates.guard("ROLE", "UPDATE", put(roles::update_role))?)
        .route("/roles/:name", gates.guard("ROLE", "DELETE", delete(roles::delete_role))?)
        .route(
            "/roles/:name/permissions/:permission",
            gates.guard("ROLE", "UPDATE", put(roles::grant_permission))?,
        )
        .route(
            "/roles/:name/permissions/:permission",
            gates.guard("ROLE", "UPDATE", delete(roles::revoke_permission))?,
        )
        // Permissions
        .route(
            "/permissions",
            gates.guard("PERMISSION", "READ", get(roles::list_permissions))?,
        )
        .route(
            "/permissions",
            gates.guard("PERMISSION", "CREATE", post(roles::register_permission))?,
        )
        // Users
        .route("/users", gates.guard("USER", "READ", get(users::list_users))?)
        .route("/users", gates.guard("USER", "CREATE", post(users::create_user))?)
        .route("/users/:username", gates.guard("USER", "READ", get(users::get_user))?)
        .route(
            "/users/:username",
            gates.guard("USER", "DELETE", delete(users::delete_user))?,
        )
        .route(
            "/users/:username/roles/:role",
            gates.guard("USER", "UPDATE", post(users::assign_role))?,
        )
        .route(
            "/users/:username/roles/:role",
            gates.guard("USER", "UPDATE", delete(users::unassign_role))?,
        )
        .route(
            "/users/:username/unlock",
            gates.guard("USER", "UPDATE", post(users::unlock_user))?,
        )
        .route(
            "/users/:username/logins",
            gates.guard("USER", "READ", get(users::recent_logins))?,
        ))
}

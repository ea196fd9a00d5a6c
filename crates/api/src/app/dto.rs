//! Request/response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_auth::{AccountStatus, IssuedToken, LoginRegister, Role, User};

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<IssuedToken> for LoginResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            token: issued.token,
            token_type: "Bearer",
            expires_at: issued.data.expiration,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub username: String,
    pub permissions: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub status: AccountStatus,
    pub login_attempts: u32,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username().to_string(),
            email: user.email().to_string(),
            display_name: user.display_name.clone(),
            status: user.status(),
            login_attempts: user.login_attempts,
            roles: user.roles.iter().cloned().collect(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LoginRegisterView {
    pub logged_in: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<&LoginRegister> for LoginRegisterView {
    fn from(entry: &LoginRegister) -> Self {
        Self {
            logged_in: entry.logged_in(),
            timestamp: entry.timestamp(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles & permissions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RoleView {
    pub name: String,
    pub description: Option<String>,
    /// Canonical names of the granted permissions, sorted.
    pub permissions: Vec<String>,
}

impl From<&Role> for RoleView {
    fn from(role: &Role) -> Self {
        Self {
            name: role.name().to_string(),
            description: role.description.clone(),
            permissions: role.granted_permissions().map(|p| p.name()).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterPermissionRequest {
    pub resource: String,
    pub action: String,
}

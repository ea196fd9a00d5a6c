use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use warden_auth::{AuthzError, LoginError, PasswordError};
use warden_core::DomainError;
use warden_infra::ServiceError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn authz_error(err: AuthzError) -> Response {
    match err {
        AuthzError::Unauthenticated => json_error(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "authentication required",
        ),
        AuthzError::Forbidden(_) => json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
    }
}

/// Service failure rendered as a JSON error body.
///
/// Messages stay generic; the full error goes to the log.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            ServiceError::Domain(err) => domain_error(err),
            ServiceError::Token(err) => {
                warn!(error = %err, "one-time token rejected");
                json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_token",
                    "token is invalid or expired",
                )
            }
            ServiceError::Login(LoginError::BadCredentials) => json_error(
                StatusCode::UNAUTHORIZED,
                "bad_credentials",
                "invalid username or password",
            ),
            ServiceError::Password(PasswordError::TooShort) => json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                PasswordError::TooShort.to_string(),
            ),
            ServiceError::Password(err @ PasswordError::Hash(_)) => internal(&err),
            ServiceError::Credential(err) => internal(&err),
            ServiceError::Storage(msg) => internal(&msg),
        }
    }
}

fn domain_error(err: DomainError) -> Response {
    match err {
        DomainError::Validation(_) | DomainError::InvalidField { .. } | DomainError::InvalidId(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        DomainError::Missing { entity, .. } => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{entity} not found"))
        }
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
    }
}

fn internal(err: &dyn std::fmt::Display) -> Response {
    error!(error = %err, "request failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal error",
    )
}

//! Login, self-registration and password flows.

use std::sync::Arc;

use axum::{Extension, Json, http::StatusCode};

use warden_auth::{NewUser, Principal};

use crate::app::dto::{
    ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, LoginResponse, MeResponse,
    RegisterRequest, ResetPasswordRequest, TokenRequest, UserView,
};
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;

/// POST /auth/login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let issued = services
        .authenticator
        .login(&body.username, &body.password)
        .await?;
    Ok(Json(issued.into()))
}

/// POST /auth/register
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<UserView>)> {
    let input = NewUser {
        username: body.username,
        email: body.email,
        display_name: body.display_name,
        roles: Vec::new(),
    };
    let user = services.accounts.register(input, &body.password).await?;
    Ok((StatusCode::CREATED, Json(UserView::from(&user))))
}

/// POST /auth/activate
pub async fn activate(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<TokenRequest>,
) -> ApiResult<StatusCode> {
    services.accounts.activate(&body.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /auth/password/forgot
///
/// Always 202, whether or not the address is known.
pub async fn forgot_password(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<ForgotPasswordRequest>,
) -> ApiResult<StatusCode> {
    services.accounts.request_password_reset(&body.email).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /auth/password/reset
pub async fn reset_password(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<ResetPasswordRequest>,
) -> ApiResult<StatusCode> {
    services
        .accounts
        .reset_password(&body.token, &body.password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /auth/password/change
pub async fn change_password(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    services
        .accounts
        .change_password(
            principal.username(),
            &body.current_password,
            &body.new_password,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /me
pub async fn me(Extension(principal): Extension<Principal>) -> Json<MeResponse> {
    Json(MeResponse {
        username: principal.username().to_string(),
        permissions: principal.permissions.authorities(),
    })
}

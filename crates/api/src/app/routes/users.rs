//! User administration.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};

use warden_auth::NewUser;

use crate::app::dto::{CreateUserRequest, LoginRegisterView, RecentQuery, UserView};
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;

const DEFAULT_RECENT_LOGINS: usize = 20;
const MAX_RECENT_LOGINS: usize = 200;

/// GET /users
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
) -> ApiResult<Json<Vec<UserView>>> {
    let users = services.users.list().await?;
    Ok(Json(users.iter().map(UserView::from).collect()))
}

/// POST /users
pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<UserView>)> {
    let input = NewUser {
        username: body.username,
        email: body.email,
        display_name: body.display_name,
        roles: body.roles,
    };
    let user = services.users.create(input, &body.password).await?;
    Ok((StatusCode::CREATED, Json(UserView::from(&user))))
}

/// GET /users/:username
pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(username): Path<String>,
) -> ApiResult<Json<UserView>> {
    let user = services.users.get(&username).await?;
    Ok(Json(UserView::from(&user)))
}

/// DELETE /users/:username
pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    services.users.delete(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /users/:username/roles/:role
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path((username, role)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    services.users.assign_role(&username, &role).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /users/:username/roles/:role
pub async fn unassign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path((username, role)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    services.users.unassign_role(&username, &role).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /users/:username/unlock
pub async fn unlock_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    services.users.unlock(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /users/:username/logins?limit=N
pub async fn recent_logins(
    Extension(services): Extension<Arc<AppServices>>,
    Path(username): Path<String>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<Vec<LoginRegisterView>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LOGINS)
        .min(MAX_RECENT_LOGINS);
    let entries = services.tracker.recent_attempts(&username, limit).await?;
    Ok(Json(entries.iter().map(LoginRegisterView::from).collect()))
}

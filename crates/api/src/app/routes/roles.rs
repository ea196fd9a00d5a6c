//! Role and permission administration.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::Path,
    http::StatusCode,
};

use warden_auth::ResourcePermission;

use crate::app::dto::{CreateRoleRequest, RegisterPermissionRequest, RoleView, UpdateRoleRequest};
use crate::app::errors::ApiResult;
use crate::app::services::AppServices;

/// GET /roles
pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
) -> ApiResult<Json<Vec<RoleView>>> {
    let roles = services.roles.list().await?;
    Ok(Json(roles.iter().map(RoleView::from).collect()))
}

/// POST /roles
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<CreateRoleRequest>,
) -> ApiResult<(StatusCode, Json<RoleView>)> {
    let role = services
        .roles
        .create(&body.name, body.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(RoleView::from(&role))))
}

/// GET /roles/:name
pub async fn get_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> ApiResult<Json<RoleView>> {
    let role = services.roles.get(&name).await?;
    Ok(Json(RoleView::from(&role)))
}

/// PUT /roles/:name
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
    Json(body): Json<UpdateRoleRequest>,
) -> ApiResult<StatusCode> {
    services
        .roles
        .update_description(&name, body.description.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /roles/:name
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    services.roles.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /roles/:name/permissions/:permission
pub async fn grant_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Path((name, permission)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let permission: ResourcePermission = permission.parse()?;
    services
        .catalog
        .grant_to_role(&name, permission.resource.as_str(), permission.action.as_str())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /roles/:name/permissions/:permission
pub async fn revoke_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Path((name, permission)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let permission: ResourcePermission = permission.parse()?;
    services
        .catalog
        .revoke_from_role(&name, permission.resource.as_str(), permission.action.as_str())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /permissions
pub async fn list_permissions(
    Extension(services): Extension<Arc<AppServices>>,
) -> ApiResult<Json<Vec<String>>> {
    let permissions = services.catalog.list_permissions().await?;
    Ok(Json(permissions.iter().map(ResourcePermission::name).collect()))
}

/// POST /permissions
///
/// 201 when the pair was created, 200 when it already existed.
pub async fn register_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<RegisterPermissionRequest>,
) -> ApiResult<StatusCode> {
    let created = services
        .catalog
        .register_permission(&body.resource, &body.action)
        .await?;
    Ok(if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    })
}

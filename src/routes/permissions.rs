//! Permission administration API.
//!
//! Grants and revocations flow through the evaluator, which enforces that
//! the caller holds `permissions.edit`. Every mutation is published to the
//! audit bus.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::{publish_audit, RequestContext};
use crate::jwt::AuthUser;
use crate::models::permission::{
    CustomPermission, NewCustomPermission, NewRolePermission, PermissionAuditEntry,
    RolePermissionReplacement, RolePermissionRule, UserPermissions,
};
use crate::models::user::Role;
use crate::permissions::keys;

/// Effective permissions of the caller.
#[utoipa::path(
    get,
    path = "/permissions/me",
    tag = "Permissions",
    responses(
        (status = 200, description = "Caller's role and custom grants", body = UserPermissions),
    ),
    security(("bearerAuth" = []))
)]
pub async fn my_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<UserPermissions>> {
    let permissions = state.evaluator.user_permissions(auth.user_id).await?;
    Ok(Json(permissions))
}

/// Effective permissions of any user. Callers may always read their own;
/// reading someone else's requires `permissions.view`.
#[utoipa::path(
    get,
    path = "/permissions/users/{user_id}",
    tag = "Permissions",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Role and custom grants", body = UserPermissions),
        (status = 403, description = "Caller may not inspect other users"),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<UserPermissions>> {
    if auth.user_id != user_id
        && !state
            .evaluator
            .has_permission(auth.user_id, keys::PERMISSIONS_VIEW, None)
            .await
    {
        return Err(AppError::forbidden("insufficient permissions"));
    }

    let permissions = state.evaluator.user_permissions(user_id).await?;
    Ok(Json(permissions))
}

/// Grant a custom permission to a user.
#[utoipa::path(
    post,
    path = "/permissions/users/{user_id}/grants",
    tag = "Permissions",
    params(("user_id" = Uuid, Path, description = "Target user ID")),
    request_body = NewCustomPermission,
    responses(
        (status = 201, description = "Permission granted", body = CustomPermission),
        (status = 403, description = "Granter lacks permissions.edit"),
        (status = 404, description = "Target user not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<NewCustomPermission>,
) -> AppResult<(StatusCode, Json<CustomPermission>)> {
    let grant = state
        .evaluator
        .grant_custom_permission(auth.user_id, user_id, payload)
        .await?;

    publish_audit(
        &state.event_bus,
        "granted",
        Some(auth.user_id),
        &grant,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(grant)))
}

/// Revoke a custom permission grant.
#[utoipa::path(
    delete,
    path = "/permissions/grants/{permission_id}",
    tag = "Permissions",
    params(("permission_id" = Uuid, Path, description = "Grant ID")),
    responses(
        (status = 204, description = "Grant revoked"),
        (status = 403, description = "Revoker lacks permissions.edit"),
        (status = 404, description = "Grant not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(permission_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let revoked = state
        .evaluator
        .revoke_custom_permission(auth.user_id, permission_id)
        .await?;

    publish_audit(
        &state.event_bus,
        "revoked",
        Some(auth.user_id),
        &revoked,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Dump every role rule, keyed by role.
#[utoipa::path(
    get,
    path = "/permissions/roles",
    tag = "Permissions",
    responses(
        (status = 200, description = "All role rules, ordered by (role, key)"),
        (status = 403, description = "Caller lacks permissions.view"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<BTreeMap<Role, Vec<RolePermissionRule>>>> {
    if !state
        .evaluator
        .has_permission(auth.user_id, keys::PERMISSIONS_VIEW, None)
        .await
    {
        return Err(AppError::forbidden("insufficient permissions"));
    }

    let rules = state.evaluator.all_role_permissions().await?;
    Ok(Json(rules))
}

/// Replace a role's rule set. Delete-then-insert in one transaction; there
/// is no partial merge.
#[utoipa::path(
    put,
    path = "/permissions/roles/{role}",
    tag = "Permissions",
    params(("role" = String, Path, description = "Role name")),
    request_body = Vec<NewRolePermission>,
    responses(
        (status = 200, description = "Rules replaced", body = Vec<RolePermissionRule>),
        (status = 400, description = "Unknown role"),
        (status = 403, description = "Updater lacks permissions.edit"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Path(role): Path<String>,
    Json(payload): Json<Vec<NewRolePermission>>,
) -> AppResult<Json<Vec<RolePermissionRule>>> {
    let role = Role::parse(&role)
        .ok_or_else(|| AppError::bad_request(format!("unknown role '{role}'")))?;

    let rules = state
        .evaluator
        .update_role_permissions(auth.user_id, role, payload)
        .await?;

    let replacement = RolePermissionReplacement {
        batch_id: Uuid::new_v4(),
        role,
        rules: rules.clone(),
    };
    publish_audit(
        &state.event_bus,
        "replaced",
        Some(auth.user_id),
        &replacement,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(rules))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

/// Read the permission audit trail. Founder-gated at the router.
#[utoipa::path(
    get,
    path = "/permissions/audit",
    tag = "Permissions",
    params(("limit" = Option<i64>, Query, description = "Max entries, default 100")),
    responses(
        (status = 200, description = "Audit entries, newest first", body = Vec<PermissionAuditEntry>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<PermissionAuditEntry>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let entries = state.evaluator.audit_log(limit).await?;
    Ok(Json(entries))
}

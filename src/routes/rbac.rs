use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, permissions, roles, Principal};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::rbac::{
    AssignRoleRequest, DbPermission, DbRole, EffectivePermissions, Permission, Role, UserRole,
};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses((status = 200, description = "System roles", body = [Role]))
)]
pub async fn list_roles(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<Role>>> {
    let roles = sqlx::query_as::<_, DbRole>(
        "SELECT id, team_id, name, display_name, description, is_system, created_at, updated_at FROM roles WHERE team_id IS NULL ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let roles: Vec<Role> = roles
        .into_iter()
        .map(Role::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(roles))
}

#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses((status = 200, description = "Permission catalog", body = [Permission]))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<Vec<Permission>>> {
    let perms = sqlx::query_as::<_, DbPermission>(
        "SELECT id, name, perm_group, display_name, description, created_at, updated_at FROM permissions ORDER BY perm_group, name",
    )
    .fetch_all(&state.pool)
    .await?;

    let perms: Vec<Permission> = perms
        .into_iter()
        .map(Permission::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(perms))
}

#[utoipa::path(
    get,
    path = "/rbac/me",
    tag = "RBAC",
    responses((status = 200, description = "Caller's effective roles and permissions", body = EffectivePermissions))
)]
pub async fn my_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<EffectivePermissions>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    // Report the live effective set: for owners that is the current
    // catalog, not only the rows provisioned when the role was granted.
    let mut permission_names: Vec<String> = authz::catalog::PERMISSION_CATALOG
        .iter()
        .filter(|p| principal.has_permission(p.name))
        .map(|p| p.name.to_string())
        .collect();
    permission_names.sort();

    let mut role_names: Vec<String> = principal.roles.iter().cloned().collect();
    role_names.sort();

    Ok(Json(EffectivePermissions {
        user_id: principal.user_id,
        team_id: principal.current_team_id,
        roles: role_names,
        permissions: permission_names,
    }))
}

#[utoipa::path(
    post,
    path = "/rbac/assign",
    tag = "RBAC",
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned in the current team"),
        (status = 409, description = "User already holds this role")
    )
)]
pub async fn assign_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<AssignRoleRequest>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let team_id = principal
        .current_team_id
        .ok_or_else(|| AppError::forbidden("no current team"))?;
    if !principal.has_permission(permissions::TEAM_MANAGE) {
        return Err(AppError::forbidden("requires team.manage"));
    }
    if payload.role == roles::OWNER {
        return Err(AppError::validation("the owner role cannot be granted"));
    }

    let role_id = system_role_id(&state.pool, &payload.role).await?;
    super::auth::fetch_user_by_id(&state.pool, payload.user_id).await?;

    let already: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM user_roles WHERE user_id = ? AND role_id = ? AND team_id = ?",
    )
    .bind(payload.user_id)
    .bind(role_id)
    .bind(team_id)
    .fetch_one(&state.pool)
    .await?;
    if already > 0 {
        return Err(AppError::conflict("user already holds this role"));
    }

    let now = utc_now();
    sqlx::query(
        "INSERT INTO user_roles (user_id, role_id, team_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(payload.user_id)
    .bind(role_id)
    .bind(team_id)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let assignment = UserRole {
        user_id: payload.user_id,
        role_id,
        team_id,
        created_at: now,
    };
    log_activity(&state.event_bus, "created", Some(auth.user_id), &assignment);

    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    post,
    path = "/rbac/revoke",
    tag = "RBAC",
    request_body = AssignRoleRequest,
    responses((status = 204, description = "Role revoked in the current team"))
)]
pub async fn revoke_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<AssignRoleRequest>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let team_id = principal
        .current_team_id
        .ok_or_else(|| AppError::forbidden("no current team"))?;
    if !principal.has_permission(permissions::TEAM_MANAGE) {
        return Err(AppError::forbidden("requires team.manage"));
    }

    let role_id = system_role_id(&state.pool, &payload.role).await?;

    let removed = sqlx::query(
        "DELETE FROM user_roles WHERE user_id = ? AND role_id = ? AND team_id = ?",
    )
    .bind(payload.user_id)
    .bind(role_id)
    .bind(team_id)
    .execute(&state.pool)
    .await?;
    if removed.rows_affected() == 0 {
        return Err(AppError::not_found("role assignment not found"));
    }

    let assignment = UserRole {
        user_id: payload.user_id,
        role_id,
        team_id,
        created_at: utc_now(),
    };
    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &assignment);

    Ok(StatusCode::NO_CONTENT)
}

async fn system_role_id(pool: &SqlitePool, role: &str) -> AppResult<Uuid> {
    if authz::catalog::find_role(role).is_none() {
        return Err(AppError::validation(format!("unknown role: {role}")));
    }

    sqlx::query_scalar("SELECT id FROM roles WHERE team_id IS NULL AND name = ?")
        .bind(role)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::integrity(format!("system role {role} not provisioned")))
}

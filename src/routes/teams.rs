use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, permissions, roles, scope, Principal};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::team::{
    DbTeam, Team, TeamCreateRequest, TeamMember, TeamMemberAddRequest, TeamUpdateRequest,
};
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/teams",
    tag = "Teams",
    responses((status = 200, description = "Teams the caller belongs to", body = [Team]))
)]
pub async fn list_teams(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Team>>> {
    let teams = sqlx::query_as::<_, DbTeam>(
        r#"
        SELECT DISTINCT t.id, t.name, t.created_at, t.updated_at
        FROM teams t
        INNER JOIN user_roles ur ON ur.team_id = t.id
        WHERE ur.user_id = ?
        ORDER BY t.created_at
        "#,
    )
    .bind(auth.user_id)
    .fetch_all(&state.pool)
    .await?;

    let teams: Vec<Team> = teams
        .into_iter()
        .map(Team::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(teams))
}

#[utoipa::path(
    post,
    path = "/teams",
    tag = "Teams",
    request_body = TeamCreateRequest,
    responses((status = 201, description = "Team created", body = Team))
)]
pub async fn create_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<TeamCreateRequest>,
) -> AppResult<(StatusCode, Json<Team>)> {
    if payload.name.trim().is_empty() {
        return Err(AppError::validation("team name must not be empty"));
    }

    let now = utc_now();
    let team_id = Uuid::new_v4();

    let mut tx = state.pool.begin().await?;

    sqlx::query("INSERT INTO teams (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
        .bind(team_id)
        .bind(payload.name.trim())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    // The creator becomes the team's owner and switches into the new team.
    let owner_role_id = system_role_id(&mut tx, roles::OWNER).await?;
    sqlx::query(
        "INSERT INTO user_roles (user_id, role_id, team_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(auth.user_id)
    .bind(owner_role_id)
    .bind(team_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE users SET current_team_id = ?, updated_at = ? WHERE id = ?")
        .bind(team_id)
        .bind(now)
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let team: Team = fetch_team(&state.pool, team_id).await?.try_into()?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &team);

    Ok((StatusCode::CREATED, Json(team)))
}

#[utoipa::path(
    post,
    path = "/teams/{id}/switch",
    tag = "Teams",
    params(("id" = Uuid, Path, description = "Team id")),
    responses(
        (status = 200, description = "Current team switched", body = Team),
        (status = 404, description = "Not a member of this team")
    )
)]
pub async fn switch_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Team>> {
    // Membership gate; non-members learn nothing about the team.
    if !is_member(&state.pool, auth.user_id, id).await? {
        return Err(AppError::not_found("team not found"));
    }

    sqlx::query("UPDATE users SET current_team_id = ?, updated_at = ? WHERE id = ?")
        .bind(id)
        .bind(utc_now())
        .bind(auth.user_id)
        .execute(&state.pool)
        .await?;

    let team: Team = fetch_team(&state.pool, id).await?.try_into()?;
    Ok(Json(team))
}

#[utoipa::path(
    put,
    path = "/teams/{id}",
    tag = "Teams",
    params(("id" = Uuid, Path, description = "Team id")),
    request_body = TeamUpdateRequest,
    responses((status = 200, description = "Team updated", body = Team))
)]
pub async fn update_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TeamUpdateRequest>,
) -> AppResult<Json<Team>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    scope::ensure_same_team(&principal, id)?;
    require_permission(&principal, permissions::TEAM_MANAGE)?;

    let mut team = fetch_team(&state.pool, id).await?;
    if let Some(name) = payload.name.as_deref() {
        if name.trim().is_empty() {
            return Err(AppError::validation("team name must not be empty"));
        }
        team.name = name.trim().to_string();
    }

    let now = utc_now();
    sqlx::query("UPDATE teams SET name = ?, updated_at = ? WHERE id = ?")
        .bind(&team.name)
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    team.updated_at = now;
    let team: Team = team.try_into()?;
    log_activity(&state.event_bus, "updated", Some(auth.user_id), &team);

    Ok(Json(team))
}

#[utoipa::path(
    get,
    path = "/teams/{id}/members",
    tag = "Teams",
    params(("id" = Uuid, Path, description = "Team id")),
    responses((status = 200, description = "Team members with their roles", body = [TeamMember]))
)]
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<TeamMember>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    scope::ensure_same_team(&principal, id)?;

    let rows: Vec<(Uuid, String, String, String)> = sqlx::query_as(
        r#"
        SELECT u.id, u.name, u.email, r.name
        FROM users u
        INNER JOIN user_roles ur ON ur.user_id = u.id
        INNER JOIN roles r ON r.id = ur.role_id
        WHERE ur.team_id = ? AND u.deleted_at IS NULL
        ORDER BY u.name, r.name
        "#,
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    let mut members: Vec<TeamMember> = Vec::new();
    for (user_id, name, email, role) in rows {
        match members.iter_mut().find(|m| m.user_id == user_id) {
            Some(member) => member.roles.push(role),
            None => members.push(TeamMember {
                user_id,
                name,
                email,
                roles: vec![role],
            }),
        }
    }

    Ok(Json(members))
}

#[utoipa::path(
    post,
    path = "/teams/{id}/members",
    tag = "Teams",
    params(("id" = Uuid, Path, description = "Team id")),
    request_body = TeamMemberAddRequest,
    responses(
        (status = 201, description = "Member added"),
        (status = 409, description = "User already holds this role in the team")
    )
)]
pub async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TeamMemberAddRequest>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    scope::ensure_same_team(&principal, id)?;
    require_permission(&principal, permissions::TEAM_INVITE)?;

    let role_id = team_assignable_role_id(&state.pool, &payload.role).await?;

    // Target user must exist and be live.
    super::auth::fetch_user_by_id(&state.pool, payload.user_id).await?;

    let already: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM user_roles WHERE user_id = ? AND role_id = ? AND team_id = ?",
    )
    .bind(payload.user_id)
    .bind(role_id)
    .bind(id)
    .fetch_one(&state.pool)
    .await?;
    if already > 0 {
        return Err(AppError::conflict("user already holds this role in the team"));
    }

    sqlx::query(
        "INSERT INTO user_roles (user_id, role_id, team_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(payload.user_id)
    .bind(role_id)
    .bind(id)
    .bind(utc_now())
    .execute(&state.pool)
    .await?;

    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    delete,
    path = "/teams/{id}/members/{user_id}",
    tag = "Teams",
    params(
        ("id" = Uuid, Path, description = "Team id"),
        ("user_id" = Uuid, Path, description = "User id")
    ),
    responses((status = 204, description = "Member removed"))
)]
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    scope::ensure_same_team(&principal, id)?;
    require_permission(&principal, permissions::TEAM_REMOVE)?;

    let removed = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND team_id = ?")
        .bind(user_id)
        .bind(id)
        .execute(&state.pool)
        .await?;
    if removed.rows_affected() == 0 {
        return Err(AppError::not_found("member not found"));
    }

    // A removed member loses their current-team pointer into this team.
    sqlx::query("UPDATE users SET current_team_id = NULL, updated_at = ? WHERE id = ? AND current_team_id = ?")
        .bind(utc_now())
        .bind(user_id)
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

fn require_permission(principal: &Principal, permission: &str) -> AppResult<()> {
    if principal.has_permission(permission) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("requires {permission}")))
    }
}

async fn fetch_team(pool: &SqlitePool, team_id: Uuid) -> AppResult<DbTeam> {
    sqlx::query_as::<_, DbTeam>("SELECT id, name, created_at, updated_at FROM teams WHERE id = ?")
        .bind(team_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("team not found"))
}

async fn is_member(pool: &SqlitePool, user_id: Uuid, team_id: Uuid) -> AppResult<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM user_roles WHERE user_id = ? AND team_id = ?")
            .bind(user_id)
            .bind(team_id)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Resolve a system role by name for membership grants. The owner role is
/// only granted through team creation, never through invites.
async fn team_assignable_role_id(pool: &SqlitePool, role: &str) -> AppResult<Uuid> {
    if role == roles::OWNER {
        return Err(AppError::validation("the owner role cannot be granted"));
    }
    if authz::catalog::find_role(role).is_none() {
        return Err(AppError::validation(format!("unknown role: {role}")));
    }

    system_role_id_pool(pool, role).await
}

async fn system_role_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    role: &str,
) -> AppResult<Uuid> {
    sqlx::query_scalar("SELECT id FROM roles WHERE team_id IS NULL AND name = ?")
        .bind(role)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::integrity(format!("system role {role} not provisioned")))
}

async fn system_role_id_pool(pool: &SqlitePool, role: &str) -> AppResult<Uuid> {
    sqlx::query_scalar("SELECT id FROM roles WHERE team_id IS NULL AND name = ?")
        .bind(role)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::integrity(format!("system role {role} not provisioned")))
}

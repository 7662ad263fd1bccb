use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, engine, Action, EntityKind, Principal, ResourceRef, TeamScope};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::project::{
    derive_base_key, key_candidate, DbProject, Project, ProjectCreateRequest, ProjectUpdateRequest,
};
use crate::utils::{utc_now, validate_hex_color};

const DEFAULT_COLOR: &str = "#3B82F6";
const KEY_RETRY_LIMIT: u32 = 100;

const PROJECT_COLUMNS: &str = "id, team_id, owner_id, name, key, description, color, is_active, settings, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/projects",
    tag = "Projects",
    responses((status = 200, description = "List projects in the current team", body = [Project]))
)]
pub async fn list_projects(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Project>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    // Scope first: without a current team the result is empty, not an error.
    let Some(team_id) = TeamScope::of(&principal).team_id() else {
        return Ok(Json(Vec::new()));
    };
    if !engine::can_view_any(&principal, EntityKind::Project) {
        return Err(AppError::forbidden("requires project.view"));
    }

    let projects = sqlx::query_as::<_, DbProject>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE team_id = ? AND deleted_at IS NULL ORDER BY created_at DESC",
    ))
    .bind(team_id)
    .fetch_all(&state.pool)
    .await?;

    let projects: Vec<Project> = projects
        .into_iter()
        .map(Project::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(projects))
}

#[utoipa::path(
    post,
    path = "/projects",
    tag = "Projects",
    request_body = ProjectCreateRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 409, description = "Project key already taken")
    )
)]
pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let team_id = principal
        .current_team_id
        .ok_or_else(|| AppError::forbidden("no current team"))?;
    if !engine::can_create(&principal, EntityKind::Project) {
        return Err(AppError::forbidden("requires project.create"));
    }

    if payload.name.trim().is_empty() {
        return Err(AppError::validation("project name must not be empty"));
    }
    let color = payload.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string());
    validate_hex_color(&color)?;

    let settings = payload
        .settings
        .as_ref()
        .map(|s| s.to_string());

    let now = utc_now();
    let project_id = Uuid::new_v4();

    // Explicit keys are honored once; derived keys retry with a numeric
    // suffix until a globally free one is found.
    if let Some(explicit) = payload.key.as_deref() {
        let key = normalize_explicit_key(explicit)?;
        if key_taken(&state.pool, &key).await? {
            return Err(AppError::conflict(format!("project key {key} already taken")));
        }
        insert_project(&state.pool, project_id, team_id, auth.user_id, &payload, &key, &color, settings.as_deref(), now)
            .await?;
    } else {
        let base = derive_base_key(&payload.name);
        let mut inserted = false;
        for attempt in 0..KEY_RETRY_LIMIT {
            let key = key_candidate(&base, attempt);
            if key_taken(&state.pool, &key).await? {
                continue;
            }
            match insert_project(&state.pool, project_id, team_id, auth.user_id, &payload, &key, &color, settings.as_deref(), now)
                .await
            {
                Ok(()) => {
                    inserted = true;
                    break;
                }
                // Raced with a concurrent insert on the same key; next suffix.
                Err(err) if err.is_unique_violation() => continue,
                Err(err) => return Err(err),
            }
        }
        if !inserted {
            return Err(AppError::conflict("could not derive a free project key"));
        }
    }

    let project: Project = fetch_project(&state.pool, &principal, project_id).await?.try_into()?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &project);

    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    get,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Project detail", body = Project))
)]
pub async fn get_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Project>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let project = fetch_project(&state.pool, &principal, id).await?;
    engine::authorize(&principal, Action::View, &resource_ref(&project))?;

    let project: Project = project.try_into()?;
    Ok(Json(project))
}

#[utoipa::path(
    put,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ProjectUpdateRequest,
    responses((status = 200, description = "Project updated", body = Project))
)]
pub async fn update_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<ProjectUpdateRequest>,
) -> AppResult<Json<Project>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let mut project = fetch_project(&state.pool, &principal, id).await?;
    engine::authorize(&principal, Action::Update, &resource_ref(&project))?;
    let old: Project = project.clone().try_into()?;

    if let Some(name) = payload.name.as_deref() {
        if name.trim().is_empty() {
            return Err(AppError::validation("project name must not be empty"));
        }
        project.name = name.trim().to_string();
    }
    if payload.description.is_some() {
        project.description = payload.description.clone();
    }
    if let Some(color) = payload.color.as_deref() {
        validate_hex_color(color)?;
        project.color = color.to_string();
    }
    if let Some(is_active) = payload.is_active {
        project.is_active = is_active;
    }
    if let Some(settings) = payload.settings.as_ref() {
        project.settings = Some(settings.to_string());
    }

    let now = utc_now();
    sqlx::query(
        "UPDATE projects SET name = ?, description = ?, color = ?, is_active = ?, settings = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&project.name)
    .bind(&project.description)
    .bind(&project.color)
    .bind(project.is_active)
    .bind(&project.settings)
    .bind(now)
    .bind(project.id)
    .execute(&state.pool)
    .await?;

    project.updated_at = now;
    let project: Project = project.try_into()?;
    crate::events::log_activity_with_context(
        &state.event_bus,
        "updated",
        Some(auth.user_id),
        &project,
        Some(&old),
        Some(crate::events::RequestContext::from_headers(&headers)),
    );

    Ok(Json(project))
}

#[utoipa::path(
    delete,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 204, description = "Project soft deleted"))
)]
pub async fn delete_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let project = fetch_project(&state.pool, &principal, id).await?;
    engine::authorize(&principal, Action::Delete, &resource_ref(&project))?;

    let now = utc_now();
    sqlx::query("UPDATE projects SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    let project: Project = project.try_into()?;
    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &project);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/projects/{id}/restore",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Project restored", body = Project))
)]
pub async fn restore_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Project>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let project = fetch_deleted_project(&state.pool, &principal, id).await?;
    engine::authorize(&principal, Action::Restore, &resource_ref(&project))?;

    let now = utc_now();
    sqlx::query("UPDATE projects SET deleted_at = NULL, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    let project: Project = fetch_project(&state.pool, &principal, id).await?.try_into()?;
    log_activity(&state.event_bus, "restored", Some(auth.user_id), &project);

    Ok(Json(project))
}

#[utoipa::path(
    delete,
    path = "/projects/{id}/force",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 204, description = "Project permanently deleted"))
)]
pub async fn force_delete_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let project = fetch_any_project(&state.pool, &principal, id).await?;
    engine::authorize(&principal, Action::ForceDelete, &resource_ref(&project))?;

    let removed: Project = project.try_into()?;
    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    log_activity(&state.event_bus, "force_deleted", Some(auth.user_id), &removed);

    Ok(StatusCode::NO_CONTENT)
}

fn resource_ref(project: &DbProject) -> ResourceRef {
    ResourceRef::new(EntityKind::Project, project.team_id, project.owner_id)
}

fn normalize_explicit_key(key: &str) -> AppResult<String> {
    let key = key.trim().to_ascii_uppercase();
    let valid = (2..=10).contains(&key.len()) && key.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(AppError::validation(
            "project key must be 2-10 alphanumeric characters",
        ));
    }
    Ok(key)
}

async fn key_taken(pool: &SqlitePool, key: &str) -> AppResult<bool> {
    // Keys are globally unique, soft-deleted projects included.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM projects WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

#[allow(clippy::too_many_arguments)]
async fn insert_project(
    pool: &SqlitePool,
    project_id: Uuid,
    team_id: Uuid,
    owner_id: Uuid,
    payload: &ProjectCreateRequest,
    key: &str,
    color: &str,
    settings: Option<&str>,
    now: chrono::DateTime<chrono::Utc>,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO projects (id, team_id, owner_id, name, key, description, color, is_active, settings, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
    )
    .bind(project_id)
    .bind(team_id)
    .bind(owner_id)
    .bind(payload.name.trim())
    .bind(key)
    .bind(&payload.description)
    .bind(color)
    .bind(settings)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch a live project visible to the principal's team. Rows outside the
/// current team surface as NotFound.
pub(crate) async fn fetch_project(
    pool: &SqlitePool,
    principal: &Principal,
    project_id: Uuid,
) -> AppResult<DbProject> {
    let project = sqlx::query_as::<_, DbProject>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ? AND deleted_at IS NULL",
    ))
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("project not found"))?;

    authz::scope::ensure_same_team(principal, project.team_id)?;
    Ok(project)
}

async fn fetch_deleted_project(
    pool: &SqlitePool,
    principal: &Principal,
    project_id: Uuid,
) -> AppResult<DbProject> {
    let project = sqlx::query_as::<_, DbProject>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ? AND deleted_at IS NOT NULL",
    ))
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("project not found"))?;

    authz::scope::ensure_same_team(principal, project.team_id)?;
    Ok(project)
}

async fn fetch_any_project(
    pool: &SqlitePool,
    principal: &Principal,
    project_id: Uuid,
) -> AppResult<DbProject> {
    let project = sqlx::query_as::<_, DbProject>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?",
    ))
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("project not found"))?;

    authz::scope::ensure_same_team(principal, project.team_id)?;
    Ok(project)
}

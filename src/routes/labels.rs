use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, permissions, Principal, TeamScope};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AuthUser;
use crate::models::label::{DbLabel, Label, LabelCreateRequest, LabelUpdateRequest};
use crate::utils::{utc_now, validate_hex_color};

const DEFAULT_COLOR: &str = "#6B7280";

const LABEL_COLUMNS: &str = "id, team_id, project_id, name, color, created_at, updated_at";

// Labels ride on the project permission group: viewing them needs
// project.view, changing them needs project.update.

#[utoipa::path(
    get,
    path = "/labels",
    tag = "Labels",
    responses((status = 200, description = "List labels in the current team", body = [Label]))
)]
pub async fn list_labels(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Label>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    let Some(team_id) = TeamScope::of(&principal).team_id() else {
        return Ok(Json(Vec::new()));
    };
    if !principal.has_permission(permissions::PROJECT_VIEW) {
        return Err(AppError::forbidden("requires project.view"));
    }

    let labels = sqlx::query_as::<_, DbLabel>(&format!(
        "SELECT {LABEL_COLUMNS} FROM labels WHERE team_id = ? ORDER BY name",
    ))
    .bind(team_id)
    .fetch_all(&state.pool)
    .await?;

    let labels: Vec<Label> = labels
        .into_iter()
        .map(Label::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(labels))
}

#[utoipa::path(
    post,
    path = "/labels",
    tag = "Labels",
    request_body = LabelCreateRequest,
    responses(
        (status = 201, description = "Label created", body = Label),
        (status = 409, description = "Label name already exists in this scope")
    )
)]
pub async fn create_label(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<LabelCreateRequest>,
) -> AppResult<(StatusCode, Json<Label>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let team_id = principal
        .current_team_id
        .ok_or_else(|| AppError::forbidden("no current team"))?;
    if !principal.has_permission(permissions::PROJECT_UPDATE) {
        return Err(AppError::forbidden("requires project.update"));
    }

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("label name must not be empty"));
    }
    let color = payload.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string());
    validate_hex_color(&color)?;

    if let Some(project_id) = payload.project_id {
        super::projects::fetch_project(&state.pool, &principal, project_id).await?;
    }

    // The unique index treats NULL project scopes as distinct rows, so the
    // team-wide case needs an explicit duplicate check.
    let duplicates: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM labels WHERE team_id = ? AND name = ? AND project_id IS ?",
    )
    .bind(team_id)
    .bind(name)
    .bind(payload.project_id)
    .fetch_one(&state.pool)
    .await?;
    if duplicates > 0 {
        return Err(AppError::conflict("label name already exists in this scope"));
    }

    let now = utc_now();
    let label_id = Uuid::new_v4();
    sqlx::query(&format!(
        "INSERT INTO labels ({LABEL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)",
    ))
    .bind(label_id)
    .bind(team_id)
    .bind(payload.project_id)
    .bind(name)
    .bind(&color)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let label: Label = fetch_label(&state.pool, &principal, label_id).await?.try_into()?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &label);

    Ok((StatusCode::CREATED, Json(label)))
}

#[utoipa::path(
    put,
    path = "/labels/{id}",
    tag = "Labels",
    params(("id" = Uuid, Path, description = "Label id")),
    request_body = LabelUpdateRequest,
    responses((status = 200, description = "Label updated", body = Label))
)]
pub async fn update_label(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<LabelUpdateRequest>,
) -> AppResult<Json<Label>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let mut label = fetch_label(&state.pool, &principal, id).await?;
    if !principal.has_permission(permissions::PROJECT_UPDATE) {
        return Err(AppError::forbidden("requires project.update"));
    }

    if let Some(name) = payload.name.as_deref() {
        if name.trim().is_empty() {
            return Err(AppError::validation("label name must not be empty"));
        }
        label.name = name.trim().to_string();
    }
    if let Some(color) = payload.color.as_deref() {
        validate_hex_color(color)?;
        label.color = color.to_string();
    }

    let now = utc_now();
    sqlx::query("UPDATE labels SET name = ?, color = ?, updated_at = ? WHERE id = ?")
        .bind(&label.name)
        .bind(&label.color)
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    label.updated_at = now;
    let label: Label = label.try_into()?;
    log_activity(&state.event_bus, "updated", Some(auth.user_id), &label);

    Ok(Json(label))
}

#[utoipa::path(
    delete,
    path = "/labels/{id}",
    tag = "Labels",
    params(("id" = Uuid, Path, description = "Label id")),
    responses((status = 204, description = "Label deleted"))
)]
pub async fn delete_label(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let label = fetch_label(&state.pool, &principal, id).await?;
    if !principal.has_permission(permissions::PROJECT_UPDATE) {
        return Err(AppError::forbidden("requires project.update"));
    }

    // Labels are not soft-deleted; attachments go with them.
    let label: Label = label.try_into()?;
    let mut tx = state.pool.begin().await?;
    sqlx::query("DELETE FROM task_labels WHERE label_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM labels WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &label);

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_label(pool: &SqlitePool, principal: &Principal, label_id: Uuid) -> AppResult<DbLabel> {
    let label = sqlx::query_as::<_, DbLabel>(&format!(
        "SELECT {LABEL_COLUMNS} FROM labels WHERE id = ?",
    ))
    .bind(label_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("label not found"))?;

    authz::scope::ensure_same_team(principal, label.team_id)?;
    Ok(label)
}

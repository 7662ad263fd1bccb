use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, engine, Action, EntityKind, Principal, ResourceRef, TeamScope};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::comment::{
    Comment, CommentCreateRequest, CommentListQuery, CommentTarget, CommentUpdateRequest, DbComment,
};
use crate::utils::utc_now;

const COMMENT_COLUMNS: &str = "id, team_id, user_id, commentable_type, commentable_id, body, parent_id, is_edited, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/comments",
    tag = "Comments",
    params(
        ("target" = Option<String>, Query, description = "Filter by target kind (task|project)"),
        ("target_id" = Option<Uuid>, Query, description = "Filter by target id"),
        ("parent_id" = Option<Uuid>, Query, description = "Filter by parent comment"),
        ("top_level_only" = Option<bool>, Query, description = "Only thread roots")
    ),
    responses((status = 200, description = "List comments in the current team", body = [Comment]))
)]
pub async fn list_comments(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<CommentListQuery>,
) -> AppResult<Json<Vec<Comment>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    let Some(team_id) = TeamScope::of(&principal).team_id() else {
        return Ok(Json(Vec::new()));
    };
    if !engine::can_view_any(&principal, EntityKind::Comment) {
        return Err(AppError::forbidden("requires comment.view"));
    }

    let target = query.target.map(|t| t.as_str().to_string());
    let top_level_only = query.top_level_only.unwrap_or(false);

    let comments = sqlx::query_as::<_, DbComment>(&format!(
        r#"
        SELECT {COMMENT_COLUMNS} FROM comments
        WHERE team_id = ? AND deleted_at IS NULL
          AND (? IS NULL OR commentable_type = ?)
          AND (? IS NULL OR commentable_id = ?)
          AND (? IS NULL OR parent_id = ?)
          AND (? = 0 OR parent_id IS NULL)
        ORDER BY created_at
        "#,
    ))
    .bind(team_id)
    .bind(&target)
    .bind(&target)
    .bind(query.target_id)
    .bind(query.target_id)
    .bind(query.parent_id)
    .bind(query.parent_id)
    .bind(top_level_only)
    .fetch_all(&state.pool)
    .await?;

    let comments: Vec<Comment> = comments
        .into_iter()
        .map(Comment::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(comments))
}

#[utoipa::path(
    post,
    path = "/comments",
    tag = "Comments",
    request_body = CommentCreateRequest,
    responses((status = 201, description = "Comment created", body = Comment))
)]
pub async fn create_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CommentCreateRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    if !engine::can_create(&principal, EntityKind::Comment) {
        if principal.current_team_id.is_none() {
            return Err(AppError::forbidden("no current team"));
        }
        return Err(AppError::forbidden("requires comment.create"));
    }
    let team_id = ensure_target_in_team(&state.pool, &principal, payload.target, payload.target_id)
        .await?;

    if payload.body.trim().is_empty() {
        return Err(AppError::validation("comment body must not be empty"));
    }

    // Threaded replies stay on the same target.
    if let Some(parent_id) = payload.parent_id {
        let parent = fetch_comment(&state.pool, &principal, parent_id).await?;
        if parent.commentable_type != payload.target.as_str()
            || parent.commentable_id != payload.target_id
        {
            return Err(AppError::validation(
                "parent comment belongs to a different target",
            ));
        }
    }

    let now = utc_now();
    let comment_id = Uuid::new_v4();

    sqlx::query(&format!(
        "INSERT INTO comments ({COMMENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, NULL)",
    ))
    .bind(comment_id)
    .bind(team_id)
    .bind(auth.user_id)
    .bind(payload.target.as_str())
    .bind(payload.target_id)
    .bind(payload.body.trim())
    .bind(payload.parent_id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let comment: Comment = fetch_comment(&state.pool, &principal, comment_id)
        .await?
        .try_into()?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &comment);

    Ok((StatusCode::CREATED, Json(comment)))
}

#[utoipa::path(
    put,
    path = "/comments/{id}",
    tag = "Comments",
    params(("id" = Uuid, Path, description = "Comment id")),
    request_body = CommentUpdateRequest,
    responses((status = 200, description = "Comment updated", body = Comment))
)]
pub async fn update_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<CommentUpdateRequest>,
) -> AppResult<Json<Comment>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let mut comment = fetch_comment(&state.pool, &principal, id).await?;
    engine::authorize(&principal, Action::Update, &resource_ref(&comment))?;
    let old: Comment = comment.clone().try_into()?;

    if payload.body.trim().is_empty() {
        return Err(AppError::validation("comment body must not be empty"));
    }

    let now = utc_now();
    sqlx::query("UPDATE comments SET body = ?, is_edited = 1, updated_at = ? WHERE id = ?")
        .bind(payload.body.trim())
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    comment.body = payload.body.trim().to_string();
    comment.is_edited = true;
    comment.updated_at = now;
    let comment: Comment = comment.try_into()?;
    let context = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "updated", Some(auth.user_id), &comment, Some(&old), Some(context));

    Ok(Json(comment))
}

#[utoipa::path(
    delete,
    path = "/comments/{id}",
    tag = "Comments",
    params(("id" = Uuid, Path, description = "Comment id")),
    responses((status = 204, description = "Comment soft deleted"))
)]
pub async fn delete_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let comment = fetch_comment(&state.pool, &principal, id).await?;
    engine::authorize(&principal, Action::Delete, &resource_ref(&comment))?;

    let now = utc_now();
    sqlx::query("UPDATE comments SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    let comment: Comment = comment.try_into()?;
    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &comment);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/comments/{id}/restore",
    tag = "Comments",
    params(("id" = Uuid, Path, description = "Comment id")),
    responses((status = 200, description = "Comment restored", body = Comment))
)]
pub async fn restore_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Comment>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let comment = fetch_deleted_comment(&state.pool, &principal, id).await?;
    engine::authorize(&principal, Action::Restore, &resource_ref(&comment))?;

    sqlx::query("UPDATE comments SET deleted_at = NULL, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(id)
        .execute(&state.pool)
        .await?;

    let comment: Comment = fetch_comment(&state.pool, &principal, id).await?.try_into()?;
    log_activity(&state.event_bus, "restored", Some(auth.user_id), &comment);

    Ok(Json(comment))
}

#[utoipa::path(
    delete,
    path = "/comments/{id}/force",
    tag = "Comments",
    params(("id" = Uuid, Path, description = "Comment id")),
    responses((status = 204, description = "Comment permanently deleted"))
)]
pub async fn force_delete_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let comment = fetch_any_comment(&state.pool, &principal, id).await?;
    engine::authorize(&principal, Action::ForceDelete, &resource_ref(&comment))?;

    let removed: Comment = comment.try_into()?;
    let mut tx = state.pool.begin().await?;
    // Replies go with their parent.
    sqlx::query("DELETE FROM comments WHERE parent_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM comments WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    log_activity(&state.event_bus, "force_deleted", Some(auth.user_id), &removed);

    Ok(StatusCode::NO_CONTENT)
}

fn resource_ref(comment: &DbComment) -> ResourceRef {
    ResourceRef::new(EntityKind::Comment, comment.team_id, comment.user_id)
}

/// The commented entity must be live and in the principal's team. Returns
/// that team id for the new comment row.
async fn ensure_target_in_team(
    pool: &SqlitePool,
    principal: &Principal,
    target: CommentTarget,
    target_id: Uuid,
) -> AppResult<Uuid> {
    let table = match target {
        CommentTarget::Task => "tasks",
        CommentTarget::Project => "projects",
    };
    let team_id: Option<Uuid> = sqlx::query_scalar(&format!(
        "SELECT team_id FROM {table} WHERE id = ? AND deleted_at IS NULL",
    ))
    .bind(target_id)
    .fetch_optional(pool)
    .await?;

    let team_id = team_id.ok_or_else(|| AppError::not_found("comment target not found"))?;
    authz::scope::ensure_same_team(principal, team_id)?;
    Ok(team_id)
}

async fn fetch_comment(
    pool: &SqlitePool,
    principal: &Principal,
    comment_id: Uuid,
) -> AppResult<DbComment> {
    let comment = sqlx::query_as::<_, DbComment>(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ? AND deleted_at IS NULL",
    ))
    .bind(comment_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("comment not found"))?;

    authz::scope::ensure_same_team(principal, comment.team_id)?;
    Ok(comment)
}

async fn fetch_deleted_comment(
    pool: &SqlitePool,
    principal: &Principal,
    comment_id: Uuid,
) -> AppResult<DbComment> {
    let comment = sqlx::query_as::<_, DbComment>(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ? AND deleted_at IS NOT NULL",
    ))
    .bind(comment_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("comment not found"))?;

    authz::scope::ensure_same_team(principal, comment.team_id)?;
    Ok(comment)
}

async fn fetch_any_comment(
    pool: &SqlitePool,
    principal: &Principal,
    comment_id: Uuid,
) -> AppResult<DbComment> {
    let comment = sqlx::query_as::<_, DbComment>(&format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?",
    ))
    .bind(comment_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("comment not found"))?;

    authz::scope::ensure_same_team(principal, comment.team_id)?;
    Ok(comment)
}

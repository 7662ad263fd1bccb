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
use crate::models::task::{
    next_key_number, transition_timestamps, DbTask, Task, TaskAssignRequest, TaskCreateRequest,
    TaskListQuery, TaskPriority, TaskStatus, TaskType, TaskUpdateRequest,
};
use crate::utils::utc_now;

const TASK_COLUMNS: &str = "id, team_id, project_id, creator_id, key, title, description, status, priority, type, story_points, due_date, started_at, completed_at, position, created_at, updated_at, deleted_at";

#[utoipa::path(
    get,
    path = "/tasks",
    tag = "Tasks",
    params(
        ("project_id" = Option<Uuid>, Query, description = "Filter by project"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("priority" = Option<String>, Query, description = "Filter by priority"),
        ("assignee_id" = Option<Uuid>, Query, description = "Filter by assignee")
    ),
    responses((status = 200, description = "List tasks in the current team", body = [Task]))
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<TaskListQuery>,
) -> AppResult<Json<Vec<Task>>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;

    let Some(team_id) = TeamScope::of(&principal).team_id() else {
        return Ok(Json(Vec::new()));
    };
    if !engine::can_view_any(&principal, EntityKind::Task) {
        return Err(AppError::forbidden("requires task.view"));
    }

    let status = query.status.map(|s| s.as_str().to_string());
    let priority = query.priority.map(|p| p.as_str().to_string());

    let tasks = sqlx::query_as::<_, DbTask>(&format!(
        r#"
        SELECT {TASK_COLUMNS} FROM tasks
        WHERE team_id = ? AND deleted_at IS NULL
          AND (? IS NULL OR project_id = ?)
          AND (? IS NULL OR status = ?)
          AND (? IS NULL OR priority = ?)
          AND (? IS NULL OR id IN (SELECT task_id FROM task_assignments WHERE user_id = ?))
        ORDER BY position, created_at
        "#,
    ))
    .bind(team_id)
    .bind(query.project_id)
    .bind(query.project_id)
    .bind(&status)
    .bind(&status)
    .bind(&priority)
    .bind(&priority)
    .bind(query.assignee_id)
    .bind(query.assignee_id)
    .fetch_all(&state.pool)
    .await?;

    let mut out = Vec::with_capacity(tasks.len());
    for db_task in tasks {
        out.push(with_relations(&state.pool, db_task).await?);
    }

    Ok(Json(out))
}

#[utoipa::path(
    post,
    path = "/tasks",
    tag = "Tasks",
    request_body = TaskCreateRequest,
    responses((status = 201, description = "Task created", body = Task))
)]
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    if !engine::can_create(&principal, EntityKind::Task) {
        if principal.current_team_id.is_none() {
            return Err(AppError::forbidden("no current team"));
        }
        return Err(AppError::forbidden("requires task.create"));
    }

    // The parent project anchors the task's team and key prefix.
    let project = super::projects::fetch_project(&state.pool, &principal, payload.project_id).await?;

    if payload.title.trim().is_empty() {
        return Err(AppError::validation("task title must not be empty"));
    }
    let status = payload.status.unwrap_or(TaskStatus::Todo);
    let priority = payload.priority.unwrap_or(TaskPriority::Medium);
    let task_type = payload.task_type.unwrap_or(TaskType::Task);

    if let Some(assignees) = payload.assignee_ids.as_deref() {
        ensure_team_members(&state.pool, project.team_id, assignees).await?;
    }
    if let Some(labels) = payload.label_ids.as_deref() {
        ensure_labels_usable(&state.pool, project.team_id, project.id, labels).await?;
    }

    let now = utc_now();
    let task_id = Uuid::new_v4();
    let (started_at, completed_at) = transition_timestamps(status, None, None, now);

    // The key suffix scan and the insert share one transaction so two
    // concurrent creates cannot both claim the same number.
    let mut tx = state.pool.begin().await?;

    let existing_keys: Vec<String> = sqlx::query_scalar("SELECT key FROM tasks WHERE project_id = ?")
        .bind(project.id)
        .fetch_all(&mut *tx)
        .await?;
    let number = next_key_number(&project.key, existing_keys.iter().map(String::as_str));
    let key = format!("{}-{}", project.key, number);

    sqlx::query(&format!(
        "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
    ))
    .bind(task_id)
    .bind(project.team_id)
    .bind(project.id)
    .bind(auth.user_id)
    .bind(&key)
    .bind(payload.title.trim())
    .bind(&payload.description)
    .bind(status.as_str())
    .bind(priority.as_str())
    .bind(task_type.as_str())
    .bind(payload.story_points)
    .bind(payload.due_date)
    .bind(started_at)
    .bind(completed_at)
    .bind(payload.position.unwrap_or(0))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if let Some(assignees) = payload.assignee_ids.as_deref() {
        sync_assignees_tx(&mut tx, task_id, assignees, auth.user_id).await?;
    }
    if let Some(labels) = payload.label_ids.as_deref() {
        sync_labels_tx(&mut tx, task_id, labels).await?;
    }

    tx.commit().await?;

    let task = with_relations(&state.pool, fetch_task(&state.pool, &principal, task_id).await?).await?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &task);

    Ok((StatusCode::CREATED, Json(task)))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Task detail", body = Task))
)]
pub async fn get_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_task = fetch_task(&state.pool, &principal, id).await?;
    let task = with_relations(&state.pool, db_task).await?;
    engine::authorize(&principal, Action::View, &resource_ref(&task))?;

    Ok(Json(task))
}

#[utoipa::path(
    put,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TaskUpdateRequest,
    responses((status = 200, description = "Task updated", body = Task))
)]
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<TaskUpdateRequest>,
) -> AppResult<Json<Task>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_task = fetch_task(&state.pool, &principal, id).await?;
    let mut task = with_relations(&state.pool, db_task).await?;
    engine::authorize(&principal, Action::Update, &resource_ref(&task))?;
    // Reassignment inside an update is still an assignment.
    if payload.assignee_ids.is_some() {
        engine::authorize(&principal, Action::Assign, &resource_ref(&task))?;
    }
    let old = task.clone();

    if let Some(title) = payload.title.as_deref() {
        if title.trim().is_empty() {
            return Err(AppError::validation("task title must not be empty"));
        }
        task.title = title.trim().to_string();
    }
    if payload.description.is_some() {
        task.description = payload.description.clone();
    }
    if let Some(priority) = payload.priority {
        task.priority = priority;
    }
    if let Some(task_type) = payload.task_type {
        task.task_type = task_type;
    }
    if payload.story_points.is_some() {
        task.story_points = payload.story_points;
    }
    if payload.due_date.is_some() {
        task.due_date = payload.due_date;
    }
    if let Some(position) = payload.position {
        task.position = position;
    }

    let now = utc_now();
    if let Some(status) = payload.status {
        let (started_at, completed_at) =
            transition_timestamps(status, task.started_at, task.completed_at, now);
        task.status = status;
        task.started_at = started_at;
        task.completed_at = completed_at;
    }

    // Validate the related sets before touching any row; the field update
    // and both set syncs then share one transaction so a failure leaves
    // nothing half-written.
    if let Some(assignees) = payload.assignee_ids.as_deref() {
        ensure_team_members(&state.pool, task.team_id, assignees).await?;
    }
    if let Some(labels) = payload.label_ids.as_deref() {
        ensure_labels_usable(&state.pool, task.team_id, task.project_id, labels).await?;
    }

    let mut tx = state.pool.begin().await?;
    sqlx::query(
        "UPDATE tasks SET title = ?, description = ?, status = ?, priority = ?, type = ?, story_points = ?, due_date = ?, started_at = ?, completed_at = ?, position = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status.as_str())
    .bind(task.priority.as_str())
    .bind(task.task_type.as_str())
    .bind(task.story_points)
    .bind(task.due_date)
    .bind(task.started_at)
    .bind(task.completed_at)
    .bind(task.position)
    .bind(now)
    .bind(task.id)
    .execute(&mut *tx)
    .await?;

    if let Some(assignees) = payload.assignee_ids.as_deref() {
        sync_assignees_tx(&mut tx, task.id, assignees, auth.user_id).await?;
    }
    if let Some(labels) = payload.label_ids.as_deref() {
        sync_labels_tx(&mut tx, task.id, labels).await?;
    }
    tx.commit().await?;

    task.updated_at = now;
    if let Some(assignees) = payload.assignee_ids {
        task.assignee_ids = assignees;
    }
    if let Some(labels) = payload.label_ids {
        task.label_ids = labels;
    }

    let context = RequestContext::from_headers(&headers);
    log_activity_with_context(&state.event_bus, "updated", Some(auth.user_id), &task, Some(&old), Some(context));

    Ok(Json(task))
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/assign",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TaskAssignRequest,
    responses((status = 200, description = "Assignees replaced", body = Task))
)]
pub async fn assign_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TaskAssignRequest>,
) -> AppResult<Json<Task>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_task = fetch_task(&state.pool, &principal, id).await?;
    let mut task = with_relations(&state.pool, db_task).await?;
    engine::authorize(&principal, Action::Assign, &resource_ref(&task))?;

    ensure_team_members(&state.pool, task.team_id, &payload.assignee_ids).await?;

    let mut tx = state.pool.begin().await?;
    sync_assignees_tx(&mut tx, task.id, &payload.assignee_ids, auth.user_id).await?;
    tx.commit().await?;
    task.assignee_ids = payload.assignee_ids;

    log_activity(&state.event_bus, "assigned", Some(auth.user_id), &task);

    Ok(Json(task))
}

#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 204, description = "Task soft deleted"))
)]
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_task = fetch_task(&state.pool, &principal, id).await?;
    let task = with_relations(&state.pool, db_task).await?;
    engine::authorize(&principal, Action::Delete, &resource_ref(&task))?;

    let now = utc_now();
    sqlx::query("UPDATE tasks SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&state.pool)
        .await?;

    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &task);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/tasks/{id}/restore",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Task restored", body = Task))
)]
pub async fn restore_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_task = fetch_deleted_task(&state.pool, &principal, id).await?;
    let task = with_relations(&state.pool, db_task).await?;
    engine::authorize(&principal, Action::Restore, &resource_ref(&task))?;

    sqlx::query("UPDATE tasks SET deleted_at = NULL, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(id)
        .execute(&state.pool)
        .await?;

    let task = with_relations(&state.pool, fetch_task(&state.pool, &principal, id).await?).await?;
    log_activity(&state.event_bus, "restored", Some(auth.user_id), &task);

    Ok(Json(task))
}

#[utoipa::path(
    delete,
    path = "/tasks/{id}/force",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 204, description = "Task permanently deleted"))
)]
pub async fn force_delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let principal = Principal::load(&state.pool, auth.user_id).await?;
    let db_task = fetch_any_task(&state.pool, &principal, id).await?;
    let task = with_relations(&state.pool, db_task).await?;
    engine::authorize(&principal, Action::ForceDelete, &resource_ref(&task))?;

    let mut tx = state.pool.begin().await?;
    sqlx::query("DELETE FROM comments WHERE commentable_type = 'task' AND commentable_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    log_activity(&state.event_bus, "force_deleted", Some(auth.user_id), &task);

    Ok(StatusCode::NO_CONTENT)
}

fn resource_ref(task: &Task) -> ResourceRef {
    ResourceRef::new(EntityKind::Task, task.team_id, task.creator_id)
        .with_assignees(task.assignee_ids.clone())
}

async fn with_relations(pool: &SqlitePool, db_task: DbTask) -> AppResult<Task> {
    let mut task: Task = db_task.try_into()?;
    task.assignee_ids =
        sqlx::query_scalar("SELECT user_id FROM task_assignments WHERE task_id = ? ORDER BY created_at")
            .bind(task.id)
            .fetch_all(pool)
            .await?;
    task.label_ids = sqlx::query_scalar("SELECT label_id FROM task_labels WHERE task_id = ?")
        .bind(task.id)
        .fetch_all(pool)
        .await?;
    Ok(task)
}

/// Replace the full assignee set: clear then reinsert, inside the caller's
/// transaction. An empty list clears all assignments.
async fn sync_assignees_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    task_id: Uuid,
    assignees: &[Uuid],
    assigned_by: Uuid,
) -> AppResult<()> {
    sqlx::query("DELETE FROM task_assignments WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut **tx)
        .await?;

    let now = utc_now();
    for user_id in assignees {
        sqlx::query(
            "INSERT OR IGNORE INTO task_assignments (task_id, user_id, assigned_by, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(user_id)
        .bind(assigned_by)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn sync_labels_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    task_id: Uuid,
    labels: &[Uuid],
) -> AppResult<()> {
    sqlx::query("DELETE FROM task_labels WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut **tx)
        .await?;

    let now = utc_now();
    for label_id in labels {
        sqlx::query("INSERT OR IGNORE INTO task_labels (task_id, label_id, created_at) VALUES (?, ?, ?)")
            .bind(task_id)
            .bind(label_id)
            .bind(now)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

/// Every assignee must hold a role in the task's team.
async fn ensure_team_members(pool: &SqlitePool, team_id: Uuid, users: &[Uuid]) -> AppResult<()> {
    for user_id in users {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM user_roles WHERE user_id = ? AND team_id = ?")
                .bind(user_id)
                .bind(team_id)
                .fetch_one(pool)
                .await?;
        if count == 0 {
            return Err(AppError::validation(format!(
                "user {user_id} is not a member of this team"
            )));
        }
    }
    Ok(())
}

/// Labels must belong to the task's team and either be team-wide or scoped
/// to the task's project.
async fn ensure_labels_usable(
    pool: &SqlitePool,
    team_id: Uuid,
    project_id: Uuid,
    labels: &[Uuid],
) -> AppResult<()> {
    for label_id in labels {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM labels WHERE id = ? AND team_id = ? AND (project_id IS NULL OR project_id = ?)",
        )
        .bind(label_id)
        .bind(team_id)
        .bind(project_id)
        .fetch_one(pool)
        .await?;
        if count == 0 {
            return Err(AppError::validation(format!(
                "label {label_id} is not usable on this task"
            )));
        }
    }
    Ok(())
}

async fn fetch_task(pool: &SqlitePool, principal: &Principal, task_id: Uuid) -> AppResult<DbTask> {
    let task = sqlx::query_as::<_, DbTask>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND deleted_at IS NULL",
    ))
    .bind(task_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("task not found"))?;

    authz::scope::ensure_same_team(principal, task.team_id)?;
    Ok(task)
}

async fn fetch_deleted_task(
    pool: &SqlitePool,
    principal: &Principal,
    task_id: Uuid,
) -> AppResult<DbTask> {
    let task = sqlx::query_as::<_, DbTask>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND deleted_at IS NOT NULL",
    ))
    .bind(task_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("task not found"))?;

    authz::scope::ensure_same_team(principal, task.team_id)?;
    Ok(task)
}

async fn fetch_any_task(pool: &SqlitePool, principal: &Principal, task_id: Uuid) -> AppResult<DbTask> {
    let task = sqlx::query_as::<_, DbTask>(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?",
    ))
    .bind(task_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("task not found"))?;

    authz::scope::ensure_same_team(principal, task.team_id)?;
    Ok(task)
}

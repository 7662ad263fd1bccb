use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::ServiceExt; // for `oneshot`

use teamboard::authz::provision::provision;
use teamboard::{create_app, events};

async fn setup() -> Result<(Router, SqlitePool, tempfile::TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;
    provision(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let (event_bus, event_rx) = events::init_event_bus();
    tokio::spawn(events::start_activity_listener(event_rx, pool.clone()));
    let app = create_app(pool.clone(), event_bus).await?;

    Ok((app, pool, dir))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(builder.body(body)?).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

/// Registered owner with a team and a project; returns (token, project_id).
async fn owner_with_project(app: &Router, email: &str, project: &str) -> Result<(String, String)> {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "Owner", "email": email, "password": "password123"})),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::CREATED, "register failed: {body}");
    let token = body["token"].as_str().context("token")?.to_string();

    let (status, _) = send(app, "POST", "/teams", Some(&token), Some(json!({"name": "Crew"}))).await?;
    anyhow::ensure!(status == StatusCode::CREATED);

    let (status, body) = send(
        app,
        "POST",
        "/projects",
        Some(&token),
        Some(json!({"name": project})),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::CREATED, "project create failed: {body}");
    let project_id = body["id"].as_str().context("project id")?.to_string();

    Ok((token, project_id))
}

#[tokio::test]
async fn task_keys_count_up_per_project() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let (token, project_id) = owner_with_project(&app, "keys@example.com", "Backend Services").await?;

    let (_, first) = send(
        &app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({"project_id": project_id, "title": "First"})),
    )
    .await?;
    assert_eq!(first["key"], "BACK-1");

    let (_, second) = send(
        &app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({"project_id": project_id, "title": "Second"})),
    )
    .await?;
    assert_eq!(second["key"], "BACK-2");

    // Soft-deleted tasks still hold their number; no key reuse.
    let first_id = first["id"].as_str().context("task id")?;
    send(&app, "DELETE", &format!("/tasks/{first_id}"), Some(&token), None).await?;

    let (_, third) = send(
        &app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({"project_id": project_id, "title": "Third"})),
    )
    .await?;
    assert_eq!(third["key"], "BACK-3");

    Ok(())
}

#[tokio::test]
async fn status_transitions_maintain_timestamps() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let (token, project_id) = owner_with_project(&app, "status@example.com", "Timers").await?;

    let (_, task) = send(
        &app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({"project_id": project_id, "title": "Tracked"})),
    )
    .await?;
    let task_id = task["id"].as_str().context("task id")?.to_string();
    assert!(task["started_at"].is_null());
    assert!(task["completed_at"].is_null());

    let (_, task) = send(
        &app,
        "PUT",
        &format!("/tasks/{task_id}"),
        Some(&token),
        Some(json!({"status": "in_progress"})),
    )
    .await?;
    let started = task["started_at"].as_str().context("started_at")?.to_string();
    assert!(task["completed_at"].is_null());

    // Re-entering in_progress keeps the original start time.
    let (_, task) = send(
        &app,
        "PUT",
        &format!("/tasks/{task_id}"),
        Some(&token),
        Some(json!({"status": "in_review"})),
    )
    .await?;
    assert_eq!(task["started_at"], json!(started));
    let (_, task) = send(
        &app,
        "PUT",
        &format!("/tasks/{task_id}"),
        Some(&token),
        Some(json!({"status": "in_progress"})),
    )
    .await?;
    assert_eq!(task["started_at"], json!(started));

    let (_, task) = send(
        &app,
        "PUT",
        &format!("/tasks/{task_id}"),
        Some(&token),
        Some(json!({"status": "done"})),
    )
    .await?;
    assert!(task["completed_at"].is_string());

    // Leaving done clears the completion time.
    let (_, task) = send(
        &app,
        "PUT",
        &format!("/tasks/{task_id}"),
        Some(&token),
        Some(json!({"status": "todo"})),
    )
    .await?;
    assert!(task["completed_at"].is_null());
    assert_eq!(task["started_at"], json!(started));

    Ok(())
}

#[tokio::test]
async fn assignee_sync_replaces_the_full_set() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let (token, project_id) = owner_with_project(&app, "sync@example.com", "Sync").await?;

    // The owner assigns themselves.
    let (_, me) = send(&app, "GET", "/auth/me", Some(&token), None).await?;
    let my_id = me["id"].as_str().context("user id")?;

    let (_, task) = send(
        &app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({"project_id": project_id, "title": "Handover", "assignee_ids": [my_id]})),
    )
    .await?;
    let task_id = task["id"].as_str().context("task id")?.to_string();
    assert_eq!(task["assignee_ids"], json!([my_id]));

    // Empty list clears every assignment.
    let (status, task) = send(
        &app,
        "POST",
        &format!("/tasks/{task_id}/assign"),
        Some(&token),
        Some(json!({"assignee_ids": []})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["assignee_ids"], json!([]));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_assignments WHERE task_id = ?")
        .bind(uuid::Uuid::parse_str(&task_id)?)
        .fetch_one(&pool)
        .await?;
    assert_eq!(rows, 0);

    // Assigning a non-member is rejected.
    let stranger = uuid::Uuid::new_v4();
    let (status, _) = send(
        &app,
        "POST",
        &format!("/tasks/{}/assign", task["id"].as_str().unwrap()),
        Some(&token),
        Some(json!({"assignee_ids": [stranger]})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn rejected_updates_leave_the_task_untouched() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let (token, project_id) = owner_with_project(&app, "atomic@example.com", "Atomic").await?;

    let (_, task) = send(
        &app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({"project_id": project_id, "title": "Original"})),
    )
    .await?;
    let task_id = task["id"].as_str().context("task id")?.to_string();

    // A bad assignee fails the whole update, field writes included.
    let stranger = uuid::Uuid::new_v4();
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/tasks/{task_id}"),
        Some(&token),
        Some(json!({
            "title": "Mutated",
            "status": "in_progress",
            "assignee_ids": [stranger],
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, task) = send(&app, "GET", &format!("/tasks/{task_id}"), Some(&token), None).await?;
    assert_eq!(task["title"], "Original");
    assert_eq!(task["status"], "todo");
    assert!(task["started_at"].is_null());
    assert_eq!(task["assignee_ids"], json!([]));

    Ok(())
}

#[tokio::test]
async fn invalid_enum_values_are_rejected() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let (token, project_id) = owner_with_project(&app, "enums@example.com", "Enums").await?;

    let (status, _) = send(
        &app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({"project_id": project_id, "title": "Bad", "status": "blocked"})),
    )
    .await?;
    // serde rejects unknown enum variants during deserialization
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

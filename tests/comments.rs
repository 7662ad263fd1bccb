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

async fn register(app: &Router, name: &str, email: &str) -> Result<(String, String)> {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": name, "email": email, "password": "password123"})),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::CREATED, "register failed: {body}");
    let token = body["token"].as_str().context("token")?.to_string();
    let user_id = body["user"]["id"].as_str().context("user id")?.to_string();
    Ok((token, user_id))
}

/// Owner with a team, a project and a task; returns (token, project_id, task_id, team_id).
async fn board(app: &Router, email: &str) -> Result<(String, String, String, String)> {
    let (token, _) = register(app, "Owner", email).await?;
    let (status, team) = send(app, "POST", "/teams", Some(&token), Some(json!({"name": "Crew"}))).await?;
    anyhow::ensure!(status == StatusCode::CREATED);
    let team_id = team["id"].as_str().context("team id")?.to_string();

    let (status, project) = send(
        app,
        "POST",
        "/projects",
        Some(&token),
        Some(json!({"name": "Discussion"})),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::CREATED);
    let project_id = project["id"].as_str().context("project id")?.to_string();

    let (status, task) = send(
        app,
        "POST",
        "/tasks",
        Some(&token),
        Some(json!({"project_id": project_id, "title": "Talk about it"})),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::CREATED);
    let task_id = task["id"].as_str().context("task id")?.to_string();

    Ok((token, project_id, task_id, team_id))
}

#[tokio::test]
async fn comments_attach_to_tasks_and_projects() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let (token, project_id, task_id, _team) = board(&app, "attach@example.com").await?;

    let (status, on_task) = send(
        &app,
        "POST",
        "/comments",
        Some(&token),
        Some(json!({"target": "task", "target_id": task_id, "body": "task note"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(on_task["target"], "task");
    assert_eq!(on_task["is_edited"], false);

    let (status, on_project) = send(
        &app,
        "POST",
        "/comments",
        Some(&token),
        Some(json!({"target": "project", "target_id": project_id, "body": "project note"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(on_project["target"], "project");

    // Listings filter by target.
    let (_, listed) = send(
        &app,
        "GET",
        &format!("/comments?target=task&target_id={task_id}"),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["body"], "task note");

    Ok(())
}

#[tokio::test]
async fn replies_must_share_the_parent_target() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let (token, project_id, task_id, _team) = board(&app, "threads@example.com").await?;

    let (_, parent) = send(
        &app,
        "POST",
        "/comments",
        Some(&token),
        Some(json!({"target": "task", "target_id": task_id, "body": "root"})),
    )
    .await?;
    let parent_id = parent["id"].as_str().context("comment id")?;

    let (status, reply) = send(
        &app,
        "POST",
        "/comments",
        Some(&token),
        Some(json!({
            "target": "task",
            "target_id": task_id,
            "body": "reply",
            "parent_id": parent_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["parent_id"], json!(parent_id));

    // A reply anchored to a different target than its parent is rejected.
    let (status, _) = send(
        &app,
        "POST",
        "/comments",
        Some(&token),
        Some(json!({
            "target": "project",
            "target_id": project_id,
            "body": "astray",
            "parent_id": parent_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn top_level_filter_hides_replies() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let (token, _project_id, task_id, _team) = board(&app, "roots@example.com").await?;

    let (_, parent) = send(
        &app,
        "POST",
        "/comments",
        Some(&token),
        Some(json!({"target": "task", "target_id": task_id, "body": "root"})),
    )
    .await?;
    let parent_id = parent["id"].as_str().context("comment id")?;

    send(
        &app,
        "POST",
        "/comments",
        Some(&token),
        Some(json!({
            "target": "task",
            "target_id": task_id,
            "body": "reply",
            "parent_id": parent_id,
        })),
    )
    .await?;

    let (status, roots) = send(
        &app,
        "GET",
        &format!("/comments?target=task&target_id={task_id}&top_level_only=true"),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roots.as_array().map(Vec::len), Some(1));
    assert_eq!(roots[0]["body"], "root");
    assert!(roots[0]["parent_id"].is_null());

    // Without the flag both levels come back.
    let (_, all) = send(
        &app,
        "GET",
        &format!("/comments?target=task&target_id={task_id}"),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(all.as_array().map(Vec::len), Some(2));

    Ok(())
}

#[tokio::test]
async fn editing_marks_the_comment() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let (token, _project_id, task_id, _team) = board(&app, "edits@example.com").await?;

    let (_, comment) = send(
        &app,
        "POST",
        "/comments",
        Some(&token),
        Some(json!({"target": "task", "target_id": task_id, "body": "draft"})),
    )
    .await?;
    let comment_id = comment["id"].as_str().context("comment id")?;
    assert_eq!(comment["is_edited"], false);

    let (status, updated) = send(
        &app,
        "PUT",
        &format!("/comments/{comment_id}"),
        Some(&token),
        Some(json!({"body": "final"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["body"], "final");
    assert_eq!(updated["is_edited"], true);

    Ok(())
}

#[tokio::test]
async fn soft_delete_and_restore_round_trip() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let (token, _project_id, task_id, _team) = board(&app, "restore@example.com").await?;

    let (_, comment) = send(
        &app,
        "POST",
        "/comments",
        Some(&token),
        Some(json!({"target": "task", "target_id": task_id, "body": "regrettable"})),
    )
    .await?;
    let comment_id = comment["id"].as_str().context("comment id")?;

    let (status, _) =
        send(&app, "DELETE", &format!("/comments/{comment_id}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Tombstones drop out of listings.
    let (_, listed) = send(
        &app,
        "GET",
        &format!("/comments?target=task&target_id={task_id}"),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(0));

    let (status, restored) =
        send(&app, "POST", &format!("/comments/{comment_id}/restore"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restored["body"], "regrettable");

    Ok(())
}

#[tokio::test]
async fn force_delete_is_author_only_and_removes_replies() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let (owner, _project_id, task_id, team_id) = board(&app, "cascade@example.com").await?;

    // An admin in the same team, fully privileged short of ownership.
    let (admin, admin_id) = register(&app, "Admin", "admin-cascade@example.com").await?;
    send(
        &app,
        "POST",
        &format!("/teams/{team_id}/members"),
        Some(&owner),
        Some(json!({"user_id": admin_id, "role": "admin"})),
    )
    .await?;
    send(&app, "POST", &format!("/teams/{team_id}/switch"), Some(&admin), None).await?;

    let (_, parent) = send(
        &app,
        "POST",
        "/comments",
        Some(&owner),
        Some(json!({"target": "task", "target_id": task_id, "body": "root"})),
    )
    .await?;
    let parent_id = parent["id"].as_str().context("comment id")?;

    let (_, reply) = send(
        &app,
        "POST",
        "/comments",
        Some(&admin),
        Some(json!({
            "target": "task",
            "target_id": task_id,
            "body": "reply",
            "parent_id": parent_id,
        })),
    )
    .await?;
    let reply_id = reply["id"].as_str().context("reply id")?;

    // Only the author may permanently erase, whatever the role says.
    let (status, _) =
        send(&app, "DELETE", &format!("/comments/{parent_id}/force"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) =
        send(&app, "DELETE", &format!("/comments/{parent_id}/force"), Some(&owner), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Replies fall with the thread root.
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE id IN (?, ?)")
        .bind(uuid::Uuid::parse_str(parent_id)?)
        .bind(uuid::Uuid::parse_str(reply_id)?)
        .fetch_one(&pool)
        .await?;
    assert_eq!(remaining, 0);

    Ok(())
}

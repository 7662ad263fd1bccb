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

#[tokio::test]
async fn effective_permissions_follow_the_role() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (owner, _) = register(&app, "Owner", "owner-fx@example.com").await?;
    let (status, team) = send(&app, "POST", "/teams", Some(&owner), Some(json!({"name": "Fx"}))).await?;
    anyhow::ensure!(status == StatusCode::CREATED);
    let team_id = team["id"].as_str().context("team id")?.to_string();

    // The owner wildcard expands to the whole catalog.
    let (_, me) = send(&app, "GET", "/rbac/me", Some(&owner), None).await?;
    assert_eq!(me["roles"], json!(["owner"]));
    assert_eq!(me["permissions"].as_array().map(Vec::len), Some(16));

    let (viewer, viewer_id) = register(&app, "Viewer", "viewer-fx@example.com").await?;
    send(
        &app,
        "POST",
        &format!("/teams/{team_id}/members"),
        Some(&owner),
        Some(json!({"user_id": viewer_id, "role": "viewer"})),
    )
    .await?;
    send(&app, "POST", &format!("/teams/{team_id}/switch"), Some(&viewer), None).await?;

    let (_, me) = send(&app, "GET", "/rbac/me", Some(&viewer), None).await?;
    assert_eq!(me["roles"], json!(["viewer"]));
    assert_eq!(
        me["permissions"],
        json!(["comment.view", "project.view", "task.view"])
    );

    // Without a current team there is no effective permission at all.
    let (_, drifter) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "Drifter", "email": "drifter-fx@example.com", "password": "password123"})),
    )
    .await?;
    let drifter_token = drifter["token"].as_str().context("token")?;
    let (_, me) = send(&app, "GET", "/rbac/me", Some(drifter_token), None).await?;
    assert!(me["team_id"].is_null());
    assert_eq!(me["permissions"], json!([]));

    Ok(())
}

#[tokio::test]
async fn role_grants_stack_and_can_be_revoked() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (owner, _) = register(&app, "Owner", "owner-rr@example.com").await?;
    let (_, team) = send(&app, "POST", "/teams", Some(&owner), Some(json!({"name": "Stack"}))).await?;
    let team_id = team["id"].as_str().context("team id")?.to_string();

    let (member, member_id) = register(&app, "Member", "member-rr@example.com").await?;
    send(
        &app,
        "POST",
        &format!("/teams/{team_id}/members"),
        Some(&owner),
        Some(json!({"user_id": member_id, "role": "member"})),
    )
    .await?;
    send(&app, "POST", &format!("/teams/{team_id}/switch"), Some(&member), None).await?;

    let (_, me) = send(&app, "GET", "/rbac/me", Some(&member), None).await?;
    assert!(!me["permissions"]
        .as_array()
        .unwrap()
        .contains(&json!("project.delete")));

    // Stacking admin on top widens the effective set.
    let (status, _) = send(
        &app,
        "POST",
        "/rbac/assign",
        Some(&owner),
        Some(json!({"user_id": member_id, "role": "admin"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (_, me) = send(&app, "GET", "/rbac/me", Some(&member), None).await?;
    assert_eq!(me["roles"], json!(["admin", "member"]));
    assert!(me["permissions"]
        .as_array()
        .unwrap()
        .contains(&json!("project.delete")));

    // Assigning the same role twice is a conflict.
    let (status, _) = send(
        &app,
        "POST",
        "/rbac/assign",
        Some(&owner),
        Some(json!({"user_id": member_id, "role": "admin"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "POST",
        "/rbac/revoke",
        Some(&owner),
        Some(json!({"user_id": member_id, "role": "admin"})),
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Revoking an assignment that no longer exists is a 404.
    let (status, _) = send(
        &app,
        "POST",
        "/rbac/revoke",
        Some(&owner),
        Some(json!({"user_id": member_id, "role": "admin"})),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn the_owner_role_is_never_grantable() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (owner, _) = register(&app, "Owner", "owner-ng@example.com").await?;
    let (_, team) = send(&app, "POST", "/teams", Some(&owner), Some(json!({"name": "Locked"}))).await?;
    let team_id = team["id"].as_str().context("team id")?.to_string();

    let (_, other_id) = register(&app, "Other", "other-ng@example.com").await?;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/teams/{team_id}/members"),
        Some(&owner),
        Some(json!({"user_id": other_id, "role": "owner"})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        "POST",
        "/rbac/assign",
        Some(&owner),
        Some(json!({"user_id": other_id, "role": "owner"})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        "POST",
        "/rbac/assign",
        Some(&owner),
        Some(json!({"user_id": other_id, "role": "superuser"})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn removed_members_lose_their_current_team() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (owner, _) = register(&app, "Owner", "owner-rm@example.com").await?;
    let (_, team) = send(&app, "POST", "/teams", Some(&owner), Some(json!({"name": "Shrinking"}))).await?;
    let team_id = team["id"].as_str().context("team id")?.to_string();

    let (member, member_id) = register(&app, "Member", "member-rm@example.com").await?;
    send(
        &app,
        "POST",
        &format!("/teams/{team_id}/members"),
        Some(&owner),
        Some(json!({"user_id": member_id, "role": "member"})),
    )
    .await?;
    send(&app, "POST", &format!("/teams/{team_id}/switch"), Some(&member), None).await?;

    send(
        &app,
        "POST",
        "/projects",
        Some(&owner),
        Some(json!({"name": "Visible"})),
    )
    .await?;
    let (_, listed) = send(&app, "GET", "/projects", Some(&member), None).await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/teams/{team_id}/members/{member_id}"),
        Some(&owner),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // The ejected member falls back to no team and sees nothing.
    let (_, me) = send(&app, "GET", "/rbac/me", Some(&member), None).await?;
    assert!(me["team_id"].is_null());
    let (status, listed) = send(&app, "GET", "/projects", Some(&member), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed, json!([]));

    Ok(())
}

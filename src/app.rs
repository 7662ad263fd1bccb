use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::EventBus;
use crate::jwt::JwtConfig;
use crate::routes::{auth, comments, health, labels, projects, rbac, tasks, teams};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool, event_bus: EventBus) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let state = AppState::new(pool, jwt_config, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let team_routes = Router::new()
        .route("/", get(teams::list_teams))
        .route("/", post(teams::create_team))
        .route("/:id", put(teams::update_team))
        .route("/:id/switch", post(teams::switch_team))
        .route("/:id/members", get(teams::list_members))
        .route("/:id/members", post(teams::add_member))
        .route("/:id/members/:user_id", delete(teams::remove_member));

    let project_routes = Router::new()
        .route("/", get(projects::list_projects))
        .route("/", post(projects::create_project))
        .route("/:id", get(projects::get_project))
        .route("/:id", put(projects::update_project))
        .route("/:id", delete(projects::delete_project))
        .route("/:id/restore", post(projects::restore_project))
        .route("/:id/force", delete(projects::force_delete_project));

    let task_routes = Router::new()
        .route("/", get(tasks::list_tasks))
        .route("/", post(tasks::create_task))
        .route("/:id", get(tasks::get_task))
        .route("/:id", put(tasks::update_task))
        .route("/:id", delete(tasks::delete_task))
        .route("/:id/assign", post(tasks::assign_task))
        .route("/:id/restore", post(tasks::restore_task))
        .route("/:id/force", delete(tasks::force_delete_task));

    let comment_routes = Router::new()
        .route("/", get(comments::list_comments))
        .route("/", post(comments::create_comment))
        .route("/:id", put(comments::update_comment))
        .route("/:id", delete(comments::delete_comment))
        .route("/:id/restore", post(comments::restore_comment))
        .route("/:id/force", delete(comments::force_delete_comment));

    let label_routes = Router::new()
        .route("/", get(labels::list_labels))
        .route("/", post(labels::create_label))
        .route("/:id", put(labels::update_label))
        .route("/:id", delete(labels::delete_label));

    let rbac_routes = Router::new()
        .route("/roles", get(rbac::list_roles))
        .route("/permissions", get(rbac::list_permissions))
        .route("/me", get(rbac::my_permissions))
        .route("/assign", post(rbac::assign_role))
        .route("/revoke", post(rbac::revoke_role));

    let router = Router::new()
        .route("/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/teams", team_routes)
        .nest("/projects", project_routes)
        .nest("/tasks", task_routes)
        .nest("/comments", comment_routes)
        .nest("/labels", label_routes)
        .nest("/rbac", rbac_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

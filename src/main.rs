use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use teamboard::{app, authz, db, events, models, routes};

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::auth::me,
        routes::auth::logout,
        routes::teams::list_teams,
        routes::teams::create_team,
        routes::teams::switch_team,
        routes::teams::update_team,
        routes::teams::list_members,
        routes::teams::add_member,
        routes::teams::remove_member,
        routes::projects::list_projects,
        routes::projects::create_project,
        routes::projects::get_project,
        routes::projects::update_project,
        routes::projects::delete_project,
        routes::projects::restore_project,
        routes::projects::force_delete_project,
        routes::tasks::list_tasks,
        routes::tasks::create_task,
        routes::tasks::get_task,
        routes::tasks::update_task,
        routes::tasks::assign_task,
        routes::tasks::delete_task,
        routes::tasks::restore_task,
        routes::tasks::force_delete_task,
        routes::comments::list_comments,
        routes::comments::create_comment,
        routes::comments::update_comment,
        routes::comments::delete_comment,
        routes::comments::restore_comment,
        routes::comments::force_delete_comment,
        routes::labels::list_labels,
        routes::labels::create_label,
        routes::labels::update_label,
        routes::labels::delete_label,
        routes::rbac::list_roles,
        routes::rbac::list_permissions,
        routes::rbac::my_permissions,
        routes::rbac::assign_role,
        routes::rbac::revoke_role,
    ),
    components(schemas(
        routes::health::HealthResponse,
        models::user::User,
        models::user::AuthResponse,
        models::user::LoginRequest,
        models::user::RegisterRequest,
        models::team::Team,
        models::team::TeamCreateRequest,
        models::team::TeamUpdateRequest,
        models::team::TeamMemberAddRequest,
        models::team::TeamMember,
        models::project::Project,
        models::project::ProjectCreateRequest,
        models::project::ProjectUpdateRequest,
        models::task::Task,
        models::task::TaskStatus,
        models::task::TaskPriority,
        models::task::TaskType,
        models::task::TaskCreateRequest,
        models::task::TaskUpdateRequest,
        models::task::TaskAssignRequest,
        models::comment::Comment,
        models::comment::CommentTarget,
        models::comment::CommentCreateRequest,
        models::comment::CommentUpdateRequest,
        models::label::Label,
        models::label::LabelCreateRequest,
        models::label::LabelUpdateRequest,
        models::rbac::Role,
        models::rbac::Permission,
        models::rbac::UserRole,
        models::rbac::AssignRoleRequest,
        models::rbac::EffectivePermissions,
    )),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Teams", description = "Team membership and switching"),
        (name = "Projects", description = "Project management"),
        (name = "Tasks", description = "Task management"),
        (name = "Comments", description = "Threaded comments"),
        (name = "Labels", description = "Task labels"),
        (name = "RBAC", description = "Roles and permissions"),
        (name = "Health", description = "Service health")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let pool = db::init().await?;

    // The permission matrix must be in place before any request is served;
    // an integrity failure here is fatal.
    authz::provision::provision(&pool).await?;

    let (event_bus, event_rx) = events::init_event_bus();
    tokio::spawn(events::start_activity_listener(event_rx, pool.clone()));

    let app = app::create_app(pool, event_bus).await?;
    let app = app.merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::JwtSecret;
use crate::auth::routes as auth_routes;
use crate::realtime::handler as ws_handler;
use crate::state::AppState;
use crate::{comments, notifications, projects, tasks, users};

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting: 5 requests per minute per IP on auth endpoints.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5) // Allow burst of 5
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let auth = Router::new()
        .route("/api/auth/register", axum::routing::post(auth_routes::register))
        .route("/api/auth/login", axum::routing::post(auth_routes::login))
        .layer(GovernorLayer {
            config: governor_config,
        });

    let user_routes = Router::new()
        .route("/api/users", axum::routing::get(users::list_users))
        .route("/api/users/me", axum::routing::get(users::me));

    let project_routes = Router::new()
        .route("/api/projects", axum::routing::get(projects::list_projects))
        .route("/api/projects", axum::routing::post(projects::create_project))
        .route("/api/projects/{id}", axum::routing::get(projects::get_project))
        .route("/api/projects/{id}", axum::routing::put(projects::update_project))
        .route("/api/projects/{id}", axum::routing::delete(projects::delete_project))
        .route(
            "/api/projects/{id}/members",
            axum::routing::post(projects::add_member),
        )
        .route(
            "/api/projects/{id}/members/{user_id}",
            axum::routing::delete(projects::remove_member),
        );

    let task_routes = Router::new()
        .route(
            "/api/projects/{id}/tasks",
            axum::routing::get(tasks::list_tasks),
        )
        .route(
            "/api/projects/{id}/tasks",
            axum::routing::post(tasks::create_task),
        )
        .route("/api/tasks/{id}", axum::routing::get(tasks::get_task))
        .route("/api/tasks/{id}", axum::routing::put(tasks::update_task))
        .route("/api/tasks/{id}", axum::routing::delete(tasks::delete_task));

    let comment_routes = Router::new()
        .route(
            "/api/tasks/{id}/comments",
            axum::routing::get(comments::list_comments),
        )
        .route(
            "/api/tasks/{id}/comments",
            axum::routing::post(comments::create_comment),
        );

    let notification_routes = Router::new()
        .route(
            "/api/notifications",
            axum::routing::get(notifications::list_notifications),
        )
        .route(
            "/api/notifications/read-all",
            axum::routing::post(notifications::mark_all_read),
        )
        .route(
            "/api/notifications/{id}/read",
            axum::routing::post(notifications::mark_read),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(auth)
        .merge(user_routes)
        .merge(project_routes)
        .merge(task_routes)
        .merge(comment_routes)
        .merge(notification_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

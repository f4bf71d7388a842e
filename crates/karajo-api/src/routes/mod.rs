pub mod auth;
pub mod environment;
pub mod job_exec;
pub mod job_http;

use crate::middleware::{mutation_signature_middleware, session_auth_middleware};
use crate::state::AppState;
use axum::{middleware, routing::get, Router};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Builds the full router: an unauthenticated health check, the job
/// webhook endpoints (each authorized by its own per-job signature
/// scheme), login/logout, the session-cookie-gated read surface
/// (`environment`, job listings, logs), and the `X-Karajo-Sign`-gated
/// mutation surface (pause/resume).
pub fn create_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let read_gated = Router::new()
        .merge(environment::router())
        .merge(job_exec::router())
        .merge(job_http::router())
        .route_layer(middleware::from_fn_with_state(app_state.clone(), session_auth_middleware));

    let mutation_gated = Router::new()
        .merge(job_exec::mutation_router())
        .merge(job_http::mutation_router())
        .route_layer(middleware::from_fn_with_state(app_state.clone(), mutation_signature_middleware));

    let api = Router::new()
        .merge(job_exec::webhook_router())
        .merge(auth::router())
        .merge(read_gated)
        .merge(mutation_gated);

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
        .nest("/karajo/api", api)
        .layer(cors)
        .layer(CompressionLayer::new().gzip(true))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn root() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "karajo",
        "version": karajo_core::VERSION,
    }))
}

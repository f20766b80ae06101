//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Largest PDF accepted by `POST /api/v1/documents`.
pub const MAX_DOCUMENT_BYTES: usize = 64 * 1024 * 1024;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Submission
        .route("/runs", post(handlers::run::submit_run))
        .route(
            "/documents",
            post(handlers::run::upload_document).layer(DefaultBodyLimit::max(MAX_DOCUMENT_BYTES)),
        )
        // Inspection
        .route("/runs/{run_id}", get(handlers::run::get_run))
        .route("/runs/{run_id}/tasks", get(handlers::run::list_run_tasks))
        .route("/health", get(health_check));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /api/v1/health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

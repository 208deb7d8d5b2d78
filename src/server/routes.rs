//! Router configuration for the web server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Queue control surface
        .route("/api/ocr/progress", get(handlers::ocr_progress))
        .route("/api/ocr/events", get(handlers::ocr_events))
        .route("/api/ocr/pause", post(handlers::ocr_pause))
        .route("/api/ocr/resume", post(handlers::ocr_resume))
        // Completion banner
        .route("/api/ocr/completion", get(handlers::latest_completion))
        .route(
            "/api/ocr/completion/:record_id/dismiss",
            post(handlers::dismiss_completion),
        )
        // Per-page operations
        .route("/api/pages/:page_id/ocr", post(handlers::enqueue_page))
        .route(
            "/api/pages/:page_id/prioritize",
            post(handlers::prioritize_page),
        )
        .route("/api/pages/:page_id/text", get(handlers::page_text_blocks))
        // Durable status counts
        .route("/api/status", get(handlers::api_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

//! HTTP API.

mod error;
mod handlers;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use state::AppState;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Without `max_content_length` request bodies are unbounded.
pub fn create_router(state: AppState, max_content_length: Option<usize>) -> Router {
    let body_limit = match max_content_length {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route("/upload", post(handlers::upload))
        .route("/bulk_upload", post(handlers::bulk_upload))
        .route("/rebuild", post(handlers::rebuild))
        .route("/health", get(handlers::health))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

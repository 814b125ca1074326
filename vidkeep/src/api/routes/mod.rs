//! API route modules.
//!
//! Organizes routes by resource type.

pub mod health;
pub mod jobs;
pub mod logging;
pub mod media;
pub mod progress;
pub mod stream;

use axum::Router;
use axum::routing::get;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/jobs", jobs::router())
        .nest("/api/queue", jobs::queue_router())
        .nest("/api/stream", stream::router())
        .nest("/api/thumbnail", media::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .route("/ws/progress", get(progress::progress_ws))
        .with_state(state)
}

//! Viewshed Service Library
//!
//! HTTP handlers and types for the DSM viewshed service.
//! This library is used by both the viewshed-service binary and integration tests.

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use viewshed::ViewshedService;

/// Application state shared across handlers.
pub struct AppState {
    /// Viewshed service computing one engine run per request.
    pub viewshed_service: ViewshedService,
}

/// Build the API router without documentation or middleware layers.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/viewshed", post(handlers::post_viewshed))
        .route("/health", get(handlers::health_check))
        .with_state(state)
}

// Re-export commonly used types for convenience
pub use handlers::{ErrorResponse, HealthResponse, ViewshedRequestBody};

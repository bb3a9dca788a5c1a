pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::moderation::handlers::handle_moderation;
use crate::state::AppState;
use crate::sync::handlers::handle_sync;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/moderation", post(handle_moderation))
        .route("/api/v1/sync", post(handle_sync))
        .with_state(state)
}

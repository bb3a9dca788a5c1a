use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::moderation::SafetyModerator;
use crate::sync::SyncOrchestrator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub moderator: Arc<SafetyModerator>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

//! Axum route handler for the Moderation API.

use axum::{extract::State, Json};

use crate::models::issue::IssueEvent;
use crate::moderation::moderator::ModerationOutcome;
use crate::state::AppState;

/// POST /api/v1/moderation
///
/// Takes an already-verified issue event. Always answers 200 with the
/// outcome, including when the classifier is unavailable.
pub async fn handle_moderation(
    State(state): State<AppState>,
    Json(event): Json<IssueEvent>,
) -> Json<ModerationOutcome> {
    Json(state.moderator.handle_event(&event).await)
}

//! Axum route handler for the Sync API.

use axum::{extract::State, http::StatusCode, Json};

use crate::errors::AppError;
use crate::models::issue::RepoRef;
use crate::state::AppState;
use crate::sync::models::{SyncMode, SyncRequest, SyncResult};

/// Rejects requests the orchestrator could only fail on.
fn validate_request(request: &SyncRequest) -> Result<(), AppError> {
    if request.mode != SyncMode::Single {
        return Ok(());
    }
    if request.issue.is_none() {
        return Err(AppError::Validation(
            "single mode requires an issue".to_string(),
        ));
    }
    match request.repo.as_deref() {
        None => Err(AppError::Validation(
            "single mode requires a repo".to_string(),
        )),
        Some(repo) => repo
            .parse::<RepoRef>()
            .map(|_| ())
            .map_err(AppError::Validation),
    }
}

/// POST /api/v1/sync
///
/// Runs one sync and returns its report: 200 when the run succeeded,
/// 500 with the same body when the fetch phase failed.
pub async fn handle_sync(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Result<(StatusCode, Json<SyncResult>), AppError> {
    validate_request(&request)?;

    let result = state.orchestrator.sync(request).await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(result)))
}

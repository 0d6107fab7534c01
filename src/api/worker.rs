//! Worker statistics and retention cleanup endpoints.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{call_failed, ApiError};
use crate::actors::task_manager::{TaskManagerMsg, WorkerStats};
use crate::app_state::AppState;

/// GET /worker/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<WorkerStats>, ApiError> {
    let stats = ractor::call!(state.manager(), |reply| TaskManagerMsg::GetStats { reply })
        .map_err(call_failed)?
        .map_err(ApiError::from)?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub cleaned_count: u64,
    pub retention_days: u32,
}

/// POST /worker/cleanup?days= - delete finalized tasks older than the
/// cutoff along with their event streams. `days` is clamped to [1, 30].
pub async fn cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let days = query.days.unwrap_or(7).clamp(1, 30);

    let cleaned_count = ractor::call!(state.manager(), |reply| TaskManagerMsg::Cleanup {
        older_than_days: days,
        reply,
    })
    .map_err(call_failed)?
    .map_err(ApiError::from)?;

    Ok(Json(CleanupResponse {
        success: true,
        cleaned_count,
        retention_days: days,
    }))
}

//! Task creation and SSE replay endpoints.

use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{KeepAlive, Sse};
use axum::Json;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use super::{call_failed, ApiError};
use crate::actors::task_manager::TaskManagerMsg;
use crate::app_state::AppState;
use crate::replay::{self, ReplayParams};
use crate::stream_id::Offset;
use crate::task::TaskConfig;

/// POST /chat/async request body. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct AsyncTaskRequest {
    pub thread_id: String,
    #[serde(flatten)]
    pub config: TaskConfig,
}

#[derive(Debug, Serialize)]
pub struct AsyncTaskResponse {
    pub task_id: String,
    pub thread_id: String,
    pub status: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// POST /chat/async - create a task; execution is detached from this
/// request and from any replay connection.
pub async fn create_async_task(
    State(state): State<AppState>,
    Json(request): Json<AsyncTaskRequest>,
) -> Result<Json<AsyncTaskResponse>, ApiError> {
    if request.thread_id.is_empty() {
        return Err(ApiError::BadRequest("thread_id must not be empty".to_string()));
    }

    let user_input = request.config.user_input();
    let info = ractor::call!(state.manager(), |reply| TaskManagerMsg::CreateTask {
        thread_id: request.thread_id,
        user_input,
        config: request.config,
        reply,
    })
    .map_err(call_failed)?
    .map_err(ApiError::from)?;

    Ok(Json(AsyncTaskResponse {
        task_id: info.task_id,
        thread_id: info.thread_id,
        status: info.status.to_string(),
        message: "async task created".to_string(),
        created_at: info.created_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    pub thread_id: String,
    pub query_id: Option<String>,
    pub offset: Option<String>,
    pub continuous: Option<bool>,
}

/// GET /chat/replay - SSE stream of historical (and, in continuous mode,
/// live) events for one task.
pub async fn replay(
    State(state): State<AppState>,
    Query(query): Query<ReplayQuery>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, ApiError> {
    if query.thread_id.is_empty() {
        return Err(ApiError::BadRequest("thread_id must not be empty".to_string()));
    }
    let offset = Offset::parse(query.offset.as_deref().unwrap_or("0"))
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if offset == Offset::End {
        return Err(ApiError::BadRequest(
            "offset must be \"0\" or a concrete stream id".to_string(),
        ));
    }

    let params = ReplayParams {
        thread_id: query.thread_id,
        query_id: query.query_id,
        offset,
        continuous: query.continuous.unwrap_or(false),
    };
    let stream = replay::sse_stream(state, params);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

//! HTTP API routes.

pub mod chat;
pub mod tasks;
pub mod threads;
pub mod worker;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::actors::task_manager::TaskManagerError;
use crate::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/chat/async", post(chat::create_async_task))
        .route("/chat/replay", get(chat::replay))
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/{task_id}", get(tasks::get_task))
        .route("/tasks/{task_id}/cancel", post(tasks::cancel_task))
        .route("/tasks/{task_id}/feedback", post(tasks::submit_feedback))
        .route("/threads/{thread_id}/running-task", get(threads::running_task))
        .route(
            "/threads/{thread_id}/research-status",
            get(threads::research_status),
        )
        .route("/worker/stats", get(worker::stats))
        .route("/worker/cleanup", post(worker::cleanup))
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "undertow",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API-shape errors surfaced as HTTP statuses. Transport errors inside the
/// streaming path never reach here; the stream itself is the ground truth.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "Request failed");
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<TaskManagerError> for ApiError {
    fn from(e: TaskManagerError) -> Self {
        match e {
            TaskManagerError::NotFound(_) => ApiError::NotFound(e.to_string()),
            TaskManagerError::NotWaiting(_) => ApiError::Conflict(e.to_string()),
            TaskManagerError::Registry(_) | TaskManagerError::EventLog(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

/// Collapses the actor-call envelope around a handler result.
pub(crate) fn call_failed<T>(e: ractor::RactorErr<T>) -> ApiError {
    ApiError::Internal(format!("actor call failed: {e}"))
}

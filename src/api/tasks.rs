//! Task inspection, cancellation, and interrupt feedback endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{call_failed, ApiError};
use crate::actors::task_manager::TaskManagerMsg;
use crate::actors::task_registry::{TaskFilter, TaskRegistryMsg};
use crate::app_state::AppState;
use crate::task::{TaskInfo, TaskStatus};

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub thread_id: String,
    pub user_input: String,
    pub status: String,
    pub progress: f64,
    pub current_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<TaskInfo> for TaskStatusResponse {
    fn from(info: TaskInfo) -> Self {
        Self {
            task_id: info.task_id,
            thread_id: info.thread_id,
            user_input: info.user_input,
            status: info.status.to_string(),
            progress: info.progress,
            current_step: info.current_step,
            created_at: info.created_at,
            started_at: info.started_at,
            completed_at: info.completed_at,
            error_message: info.error_message,
        }
    }
}

/// GET /tasks/{task_id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let info = ractor::call!(state.registry(), |reply| TaskRegistryMsg::Get {
        task_id: task_id.clone(),
        reply,
    })
    .map_err(call_failed)?
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .ok_or_else(|| ApiError::NotFound(format!("task not found: {task_id}")))?;

    Ok(Json(info.into()))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub thread_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskStatusResponse>,
    pub total_count: usize,
}

/// GET /tasks?thread_id=&status=&limit=
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let tasks = ractor::call!(state.registry(), |reply| TaskRegistryMsg::List {
        filter: TaskFilter {
            thread_id: query.thread_id.clone(),
            status,
            limit: Some(limit),
        },
        reply,
    })
    .map_err(call_failed)?
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let tasks: Vec<TaskStatusResponse> = tasks.into_iter().map(Into::into).collect();
    Ok(Json(TaskListResponse {
        total_count: tasks.len(),
        tasks,
    }))
}

#[derive(Debug, Serialize)]
pub struct TaskCancelResponse {
    pub task_id: String,
    pub success: bool,
    pub message: String,
}

/// POST /tasks/{task_id}/cancel - idempotent; cancelling a finished task is
/// a successful no-op.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskCancelResponse>, ApiError> {
    use crate::actors::task_manager::CancelOutcome;

    let outcome = ractor::call!(state.manager(), |reply| TaskManagerMsg::CancelTask {
        task_id: task_id.clone(),
        reply,
    })
    .map_err(call_failed)?
    .map_err(ApiError::from)?;

    let message = match outcome {
        CancelOutcome::Cancelled => "task cancelled".to_string(),
        CancelOutcome::AlreadyTerminal => "task already finished".to_string(),
    };
    Ok(Json(TaskCancelResponse {
        task_id,
        success: true,
        message,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub option: String,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub task_id: String,
    pub accepted: bool,
}

/// POST /tasks/{task_id}/feedback - resolve a pending interrupt. 409 when
/// no interrupt is waiting (including when someone else answered first).
pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    if request.option.is_empty() {
        return Err(ApiError::BadRequest("option must not be empty".to_string()));
    }

    ractor::call!(state.manager(), |reply| TaskManagerMsg::SubmitFeedback {
        task_id: task_id.clone(),
        option: request.option,
        reply,
    })
    .map_err(call_failed)?
    .map_err(ApiError::from)?;

    Ok(Json(FeedbackResponse {
        task_id,
        accepted: true,
    }))
}

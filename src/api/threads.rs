//! Thread-level status endpoints: the running task snapshot and the
//! research summary reconstructed from the thread's event streams.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{call_failed, ApiError};
use crate::actors::event_log::{self};
use crate::actors::task_registry::TaskRegistryMsg;
use crate::app_state::AppState;
use crate::events::{split_stream_key, EventKind};
use crate::stream_id::{Offset, StreamId};

#[derive(Debug, Serialize)]
pub struct RunningTaskResponse {
    pub has_running_task: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// GET /threads/{thread_id}/running-task
pub async fn running_task(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<RunningTaskResponse>, ApiError> {
    let running = ractor::call!(state.registry(), |reply| {
        TaskRegistryMsg::FindRunningByThread {
            thread_id: thread_id.clone(),
            reply,
        }
    })
    .map_err(call_failed)?
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(match running {
        Some(info) => RunningTaskResponse {
            has_running_task: true,
            task_id: Some(info.task_id),
            status: Some(info.status.to_string()),
            progress: Some(info.progress),
            current_step: info.current_step,
            started_at: info.started_at,
        },
        None => RunningTaskResponse {
            has_running_task: false,
            task_id: None,
            status: None,
            progress: None,
            current_step: None,
            started_at: None,
        },
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchSummary {
    pub research_id: String,
    pub status: String,
    pub topic: String,
    pub query_id: String,
    pub stream_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_id: Option<StreamId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_id: Option<StreamId>,
}

#[derive(Debug, Serialize)]
pub struct ResearchStatusResponse {
    pub has_research_events: bool,
    pub ongoing_research: Option<ResearchSummary>,
    pub completed_research: Vec<ResearchSummary>,
    pub latest_research_id: Option<String>,
    pub running_task: RunningTaskResponse,
}

/// Events scanned per stream when reconstructing research status; streams
/// longer than this only contribute their head, which is where the phase
/// markers live.
const SCAN_LIMIT: usize = 200;

/// GET /threads/{thread_id}/research-status
///
/// Scans every stream the thread owns for `research_start`/`research_end`
/// markers and folds them into per-research summaries.
pub async fn research_status(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ResearchStatusResponse>, ApiError> {
    let running = running_task(State(state.clone()), Path(thread_id.clone()))
        .await?
        .0;

    let log = state.event_log();
    let pattern = format!("chat:{thread_id}:*");
    let stream_keys = event_log::keys(&log, pattern)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut research: HashMap<String, ResearchSummary> = HashMap::new();
    for key in &stream_keys {
        let events = match event_log::range(&log, key, StreamId::ZERO, Offset::End, SCAN_LIMIT).await
        {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(stream_key = %key, error = %e, "Research scan read failed");
                continue;
            }
        };
        for event in events {
            if !matches!(event.kind, EventKind::ResearchStart | EventKind::ResearchEnd) {
                continue;
            }
            let data = &event.data;
            let Some(research_id) = data
                .get("research_id")
                .or_else(|| data.get("id"))
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            // Older events may predate the query_id payload field; the
            // stream key's task half is the same value.
            let query_id = data
                .get("query_id")
                .and_then(|v| v.as_str())
                .or_else(|| split_stream_key(key).map(|(_, task_id)| task_id))
                .unwrap_or_default()
                .to_string();
            let topic = data
                .get("topic")
                .or_else(|| data.get("research_topic"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            match event.kind {
                EventKind::ResearchStart => {
                    research.insert(
                        research_id.to_string(),
                        ResearchSummary {
                            research_id: research_id.to_string(),
                            status: "running".to_string(),
                            topic,
                            query_id,
                            stream_key: key.clone(),
                            start_id: Some(event.id),
                            end_id: None,
                        },
                    );
                }
                EventKind::ResearchEnd => match research.get_mut(research_id) {
                    Some(summary) => {
                        summary.status = "completed".to_string();
                        summary.end_id = Some(event.id);
                    }
                    // An end without a start still proves a completed run.
                    None => {
                        research.insert(
                            research_id.to_string(),
                            ResearchSummary {
                                research_id: research_id.to_string(),
                                status: "completed".to_string(),
                                topic,
                                query_id,
                                stream_key: key.clone(),
                                start_id: None,
                                end_id: Some(event.id),
                            },
                        );
                    }
                },
                _ => unreachable!(),
            }
        }
    }

    let latest_research_id = research
        .values()
        .max_by_key(|summary| summary.end_id.or(summary.start_id))
        .map(|summary| summary.research_id.clone());

    let ongoing_research = research
        .values()
        .find(|summary| summary.status == "running")
        .cloned();

    let mut completed_research: Vec<ResearchSummary> = research
        .into_values()
        .filter(|summary| summary.status == "completed")
        .collect();
    // Newest first, by stream position.
    completed_research.sort_by_key(|summary| {
        std::cmp::Reverse(summary.end_id.or(summary.start_id).unwrap_or(StreamId::ZERO))
    });

    Ok(Json(ResearchStatusResponse {
        has_research_events: ongoing_research.is_some() || !completed_research.is_empty(),
        ongoing_research,
        completed_research,
        latest_research_id,
        running_task: running,
    }))
}

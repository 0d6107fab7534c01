//! Shared fixtures for the HTTP integration tests: an isolated actor stack
//! behind the real router, plus SSE parsing helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use ractor::Actor;
use tower::ServiceExt;

use undertow::actors::event_log::{EventLogActor, EventLogArguments};
use undertow::actors::task_manager::{TaskManagerActor, TaskManagerArguments};
use undertow::actors::task_registry::{TaskRegistryActor, TaskRegistryArguments};
use undertow::api;
use undertow::app_state::AppState;
use undertow::config::Config;
use undertow::engine::scripted::ScriptedEngine;
use undertow::stream_id::StreamId;

/// Spawns a fresh in-memory actor stack behind the real router.
pub async fn test_app(engine: ScriptedEngine) -> Router {
    test_app_with_limit(engine, 3).await
}

pub async fn test_app_with_limit(engine: ScriptedEngine, max_concurrent: usize) -> Router {
    let (event_log, _) = Actor::spawn(None, EventLogActor, EventLogArguments::InMemory)
        .await
        .expect("spawn event log");
    let (registry, _) = Actor::spawn(
        None,
        TaskRegistryActor,
        TaskRegistryArguments::in_memory(7),
    )
    .await
    .expect("spawn registry");
    let (manager, _) = Actor::spawn(
        None,
        TaskManagerActor,
        TaskManagerArguments {
            registry: registry.clone(),
            event_log: event_log.clone(),
            engine: Arc::new(engine),
            max_concurrent,
        },
    )
    .await
    .expect("spawn manager");

    let state = AppState::new(manager, registry, event_log, Config::default());
    api::router().with_state(state)
}

pub async fn post_json(
    app: &Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub async fn get_json(app: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// One parsed SSE frame. `id` is set for stored stream events and absent on
/// the synthetic end-of-replay summary.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: String,
    pub id: Option<StreamId>,
    pub data: serde_json::Value,
}

pub fn parse_sse(text: &str) -> Vec<SseFrame> {
    text.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut id = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    event = Some(value.trim().to_string());
                } else if let Some(value) = line.strip_prefix("id:") {
                    id = value.trim().parse::<StreamId>().ok();
                } else if let Some(value) = line.strip_prefix("data:") {
                    data = Some(value.trim().to_string());
                }
            }
            Some(SseFrame {
                event: event?,
                id,
                data: data
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or(serde_json::Value::Null),
            })
        })
        .collect()
}

/// Collects a whole replay response. The server closes the stream after the
/// synthetic `replay_end`, so this terminates for both modes; the timeout
/// guards against protocol regressions that would hang it.
pub async fn get_sse(app: &Router, path: &str) -> (StatusCode, Vec<SseFrame>) {
    get_sse_within(app, path, Duration::from_secs(10)).await
}

pub async fn get_sse_within(
    app: &Router,
    path: &str,
    timeout: Duration,
) -> (StatusCode, Vec<SseFrame>) {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    if status != StatusCode::OK {
        return (status, Vec::new());
    }
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let bytes = tokio::time::timeout(timeout, response.into_body().collect())
        .await
        .expect("replay stream did not close in time")
        .unwrap()
        .to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    (status, parse_sse(&text))
}

/// Stored stream events only (frames carrying a stream ID).
pub fn stored_events(frames: &[SseFrame]) -> Vec<SseFrame> {
    frames.iter().filter(|f| f.id.is_some()).cloned().collect()
}

/// Polls `GET /tasks/{id}` until the task reaches `status`.
pub async fn wait_for_task_status(app: &Router, task_id: &str, status: &str) -> serde_json::Value {
    for _ in 0..300 {
        let (code, body) = get_json(app, &format!("/tasks/{task_id}")).await;
        if code == StatusCode::OK && body["status"] == status {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached status {status}");
}

/// Polls until the task's `current_step` equals the given value.
pub async fn wait_for_current_step(app: &Router, task_id: &str, step: &str) -> serde_json::Value {
    for _ in 0..300 {
        let (code, body) = get_json(app, &format!("/tasks/{task_id}")).await;
        if code == StatusCode::OK && body["current_step"] == step {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached step {step:?}");
}

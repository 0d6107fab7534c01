//! Task lifecycle integration tests: creation, completion, cancellation,
//! stats, cleanup, and the thread-level status endpoints.

mod common;

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use serde_json::json;

use common::*;
use undertow::engine::scripted::{message, ScriptedEngine};
use undertow::engine::EngineEvent;

fn chat_request(thread_id: &str, content: &str) -> serde_json::Value {
    json!({
        "thread_id": thread_id,
        "messages": [{"role": "user", "content": content}],
    })
}

#[tokio::test]
async fn happy_path_runs_to_completion() {
    let app = test_app(ScriptedEngine::canned_research()).await;

    let (status, body) = post_json(&app, "/chat/async", chat_request("th1", "hi")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["thread_id"], "th1");
    assert_eq!(body["status"], "pending");
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let done = wait_for_task_status(&app, &task_id, "completed").await;
    assert_eq!(done["progress"], 1.0);
    assert_eq!(done["user_input"], "hi");
    assert!(done["completed_at"].is_string());
    assert!(done["error_message"].is_null());
}

#[tokio::test]
async fn create_task_requires_a_thread_id() {
    let app = test_app(ScriptedEngine::default()).await;
    let (status, _) = post_json(
        &app,
        "/chat/async",
        json!({"thread_id": "", "messages": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_request_fields_are_ignored() {
    let app = test_app(ScriptedEngine::default()).await;
    let (status, body) = post_json(
        &app,
        "/chat/async",
        json!({
            "thread_id": "th1",
            "messages": [],
            "podcast_voice": "baritone",
            "debug": true
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    wait_for_task_status(&app, body["task_id"].as_str().unwrap(), "completed").await;
}

#[tokio::test]
async fn unknown_task_returns_404() {
    let app = test_app(ScriptedEngine::default()).await;
    let (status, _) = get_json(&app, "/tasks/no-such-task").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post_json(&app, "/tasks/no-such-task/cancel", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancellation_finalizes_within_a_second() {
    // A long-winded engine so the cancel lands mid-run.
    let steps: Vec<EngineEvent> = (0..50)
        .map(|i| message("researcher", "m", &format!("token {i}")))
        .collect();
    let engine = ScriptedEngine::new(steps).with_step_delay(Duration::from_millis(100));
    let app = test_app(engine).await;

    let (_, body) = post_json(&app, "/chat/async", chat_request("th1", "long job")).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    wait_for_task_status(&app, &task_id, "running").await;

    let cancel_started = Instant::now();
    let (status, body) = post_json(&app, &format!("/tasks/{task_id}/cancel"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let cancelled = wait_for_task_status(&app, &task_id, "cancelled").await;
    assert!(
        cancel_started.elapsed() < Duration::from_secs(1),
        "cancellation took {:?}",
        cancel_started.elapsed()
    );
    assert!(cancelled["completed_at"].is_string());

    // The stream carries a terminal error event naming the reason.
    let (_, frames) = get_sse(
        &app,
        &format!("/chat/replay?thread_id=th1&query_id={task_id}"),
    )
    .await;
    let stored = stored_events(&frames);
    let last = stored.last().expect("stream has events");
    assert_eq!(last.event, "error");
    assert_eq!(last.data["reason"], "cancelled");
}

#[tokio::test]
async fn cancel_is_idempotent_on_finished_tasks() {
    let app = test_app(ScriptedEngine::canned_research()).await;
    let (_, body) = post_json(&app, "/chat/async", chat_request("th1", "hi")).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    wait_for_task_status(&app, &task_id, "completed").await;

    for _ in 0..2 {
        let (status, body) = post_json(&app, &format!("/tasks/{task_id}/cancel"), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }
    // Status stays frozen.
    let (_, body) = get_json(&app, &format!("/tasks/{task_id}")).await;
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn list_tasks_filters_by_thread_and_status() {
    let app = test_app(ScriptedEngine::canned_research()).await;

    let (_, a) = post_json(&app, "/chat/async", chat_request("th1", "a")).await;
    let (_, b) = post_json(&app, "/chat/async", chat_request("th1", "b")).await;
    let (_, c) = post_json(&app, "/chat/async", chat_request("th2", "c")).await;
    for body in [&a, &b, &c] {
        wait_for_task_status(&app, body["task_id"].as_str().unwrap(), "completed").await;
    }

    let (status, body) = get_json(&app, "/tasks?thread_id=th1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 2);

    let (_, body) = get_json(&app, "/tasks?status=completed").await;
    assert_eq!(body["total_count"], 3);

    let (_, body) = get_json(&app, "/tasks?status=failed").await;
    assert_eq!(body["total_count"], 0);

    let (status, _) = get_json(&app, "/tasks?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = get_json(&app, "/tasks?limit=1").await;
    assert_eq!(body["total_count"], 1);
}

#[tokio::test]
async fn worker_stats_reflect_task_counts() {
    let app = test_app(ScriptedEngine::canned_research()).await;

    let (_, a) = post_json(&app, "/chat/async", chat_request("th1", "a")).await;
    let (_, b) = post_json(&app, "/chat/async", chat_request("th2", "b")).await;
    for body in [&a, &b] {
        wait_for_task_status(&app, body["task_id"].as_str().unwrap(), "completed").await;
    }

    let (status, stats) = get_json(&app, "/worker/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["is_running"], true);
    assert_eq!(stats["completed_tasks"], 2);
    assert_eq!(stats["total_tasks"], 2);
    assert_eq!(stats["max_concurrent_tasks"], 3);
    assert!(stats["uptime_seconds"].is_number());

    // Slot release is asynchronous to the status transition.
    for _ in 0..100 {
        let (_, stats) = get_json(&app, "/worker/stats").await;
        if stats["available_slots"] == 3 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("runner slots were never released");
}

#[tokio::test]
async fn cleanup_leaves_fresh_tasks_alone_and_clamps_days() {
    let app = test_app(ScriptedEngine::canned_research()).await;
    let (_, body) = post_json(&app, "/chat/async", chat_request("th1", "hi")).await;
    wait_for_task_status(&app, body["task_id"].as_str().unwrap(), "completed").await;

    let (status, body) = post_json(&app, "/worker/cleanup?days=50", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["cleaned_count"], 0);
    assert_eq!(body["retention_days"], 30);
}

#[tokio::test]
async fn running_task_endpoint_tracks_the_active_task() {
    let engine = ScriptedEngine::new(vec![message("reporter", "m1", "slow")])
        .with_step_delay(Duration::from_millis(300));
    let app = test_app(engine).await;

    let (_, body) = get_json(&app, "/threads/th1/running-task").await;
    assert_eq!(body["has_running_task"], false);

    let (_, created) = post_json(&app, "/chat/async", chat_request("th1", "hi")).await;
    let task_id = created["task_id"].as_str().unwrap().to_string();
    wait_for_task_status(&app, &task_id, "running").await;

    let (_, body) = get_json(&app, "/threads/th1/running-task").await;
    assert_eq!(body["has_running_task"], true);
    assert_eq!(body["task_id"], task_id.as_str());
    assert_eq!(body["status"], "running");

    wait_for_task_status(&app, &task_id, "completed").await;
    let (_, body) = get_json(&app, "/threads/th1/running-task").await;
    assert_eq!(body["has_running_task"], false);
}

#[tokio::test]
async fn research_status_reports_completed_runs() {
    let app = test_app(ScriptedEngine::canned_research()).await;

    let (_, body) = get_json(&app, "/threads/th1/research-status").await;
    assert_eq!(body["has_research_events"], false);

    let (_, created) = post_json(&app, "/chat/async", chat_request("th1", "dig into rust")).await;
    let task_id = created["task_id"].as_str().unwrap().to_string();
    wait_for_task_status(&app, &task_id, "completed").await;

    let (status, body) = get_json(&app, "/threads/th1/research-status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_research_events"], true);
    assert!(body["ongoing_research"].is_null());
    assert_eq!(body["latest_research_id"], task_id.as_str());

    let completed = body["completed_research"].as_array().unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["research_id"], task_id.as_str());
    assert_eq!(completed[0]["topic"], "dig into rust");
    assert_eq!(completed[0]["status"], "completed");
}

#[tokio::test]
async fn health_endpoint_answers() {
    let app = test_app(ScriptedEngine::default()).await;
    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

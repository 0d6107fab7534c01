//! Interrupt-resume integration tests: the runner suspends on an engine
//! interrupt, feedback resumes it, and the conflict rules hold.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::*;
use undertow::engine::scripted::{message, ScriptedEngine};

fn manual_plan_request(thread_id: &str, content: &str) -> serde_json::Value {
    json!({
        "thread_id": thread_id,
        "messages": [{"role": "user", "content": content}],
        "auto_accepted_plan": false,
    })
}

fn post_run_engine() -> ScriptedEngine {
    ScriptedEngine::new(vec![
        message("researcher", "m1", "digging in"),
        message("reporter", "m2", "final report"),
    ])
    .with_step_delay(Duration::from_millis(50))
}

#[tokio::test]
async fn interrupt_suspends_and_feedback_resumes() {
    let app = test_app(post_run_engine()).await;

    let (_, body) = post_json(&app, "/chat/async", manual_plan_request("th1", "plan this")).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    // The runner parks with the step surfaced in TaskInfo; the task stays
    // running the whole time.
    let parked = wait_for_current_step(&app, &task_id, "awaiting interrupt feedback").await;
    assert_eq!(parked["status"], "running");

    let (status, body) = post_json(
        &app,
        &format!("/tasks/{task_id}/feedback"),
        json!({"option": "accepted"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);

    wait_for_task_status(&app, &task_id, "completed").await;

    // The stream shows the interrupt, then the resumed events, then the
    // terminal replay_end.
    let (_, frames) = get_sse(
        &app,
        &format!("/chat/replay?thread_id=th1&query_id={task_id}"),
    )
    .await;
    let stored = stored_events(&frames);
    let kinds: Vec<&str> = stored.iter().map(|f| f.event.as_str()).collect();

    let interrupt_at = kinds.iter().position(|k| *k == "interrupt").unwrap();
    let chunk_at = kinds.iter().position(|k| *k == "message_chunk").unwrap();
    assert!(interrupt_at < chunk_at, "events resumed before the interrupt?");
    assert_eq!(*kinds.last().unwrap(), "replay_end");

    let interrupt = &stored[interrupt_at];
    assert_eq!(interrupt.data["finish_reason"], "interrupt");
    let options = interrupt.data["options"].as_array().unwrap();
    assert_eq!(options.len(), 2);
    assert_eq!(options[1]["value"], "accepted");
}

#[tokio::test]
async fn second_feedback_for_the_same_interrupt_conflicts() {
    let app = test_app(post_run_engine()).await;

    let (_, body) = post_json(&app, "/chat/async", manual_plan_request("th1", "plan this")).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    wait_for_current_step(&app, &task_id, "awaiting interrupt feedback").await;

    let (first, _) = post_json(
        &app,
        &format!("/tasks/{task_id}/feedback"),
        json!({"option": "accepted"}),
    )
    .await;
    assert_eq!(first, StatusCode::OK);

    // First wins; the loser gets a conflict.
    let (second, body) = post_json(
        &app,
        &format!("/tasks/{task_id}/feedback"),
        json!({"option": "edit_plan"}),
    )
    .await;
    assert_eq!(second, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    wait_for_task_status(&app, &task_id, "completed").await;
}

#[tokio::test]
async fn feedback_without_a_pending_interrupt_conflicts() {
    let app = test_app(post_run_engine()).await;

    // Auto-accepted plan: no interrupt is ever raised.
    let (_, body) = post_json(
        &app,
        "/chat/async",
        json!({
            "thread_id": "th1",
            "messages": [{"role": "user", "content": "just run"}],
        }),
    )
    .await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    wait_for_task_status(&app, &task_id, "running").await;

    let (status, _) = post_json(
        &app,
        &format!("/tasks/{task_id}/feedback"),
        json!({"option": "accepted"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    wait_for_task_status(&app, &task_id, "completed").await;
}

#[tokio::test]
async fn feedback_for_an_unknown_task_is_not_found() {
    let app = test_app(post_run_engine()).await;
    let (status, _) = post_json(
        &app,
        "/tasks/no-such-task/feedback",
        json!({"option": "accepted"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancelling_a_suspended_task_unparks_the_runner() {
    let app = test_app(post_run_engine()).await;

    let (_, body) = post_json(&app, "/chat/async", manual_plan_request("th1", "plan this")).await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    wait_for_current_step(&app, &task_id, "awaiting interrupt feedback").await;

    let (status, _) = post_json(&app, &format!("/tasks/{task_id}/cancel"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    wait_for_task_status(&app, &task_id, "cancelled").await;

    // Feedback after cancellation has nothing to resume.
    let (status, _) = post_json(
        &app,
        &format!("/tasks/{task_id}/feedback"),
        json!({"option": "accepted"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, frames) = get_sse(
        &app,
        &format!("/chat/replay?thread_id=th1&query_id={task_id}"),
    )
    .await;
    let stored = stored_events(&frames);
    let last = stored.last().unwrap();
    assert_eq!(last.event, "error");
    assert_eq!(last.data["reason"], "cancelled");
}

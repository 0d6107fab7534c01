//! Stream runner: drives one workflow invocation.
//!
//! Translates the engine's event sequence into canonical events appended to
//! the task's stream, preserving order exactly; updates progress as it
//! goes; suspends on interrupts until feedback arrives through the task
//! manager; and finalizes the stream with exactly one terminal event
//! (`replay_end` on success, `error` on failure or cancellation).
//!
//! Every await point also selects on the cancel signal, which bounds
//! cancellation latency well under the 1s requirement.

use std::sync::Arc;

use ractor::ActorRef;
use tokio::sync::{oneshot, watch};

use crate::actors::event_log::{self, EventLogMsg};
use crate::actors::task_manager::TaskManagerMsg;
use crate::actors::task_registry::{self, TaskPatch, TaskRegistryMsg};
use crate::engine::{
    EngineEvent, EngineHandle, InterruptOption, ToolCallChunk, WorkflowEngine, WorkflowRun,
};
use crate::events::{stream_key, EventKind};
use crate::task::{TaskConfig, TaskStatus};

/// Progress/step refresh cadence, in appended events.
const PROGRESS_EVERY: u64 = 10;

pub struct RunnerContext {
    pub task_id: String,
    pub thread_id: String,
    pub config: TaskConfig,
    pub engine: Arc<dyn WorkflowEngine>,
    pub event_log: ActorRef<EventLogMsg>,
    pub registry: ActorRef<TaskRegistryMsg>,
    pub manager: ActorRef<TaskManagerMsg>,
    pub cancel: watch::Receiver<bool>,
}

enum RunOutcome {
    Completed { events: u64 },
    Failed { message: String },
    Cancelled,
}

/// Entry point; spawned by the task manager once the task is admitted.
pub async fn run_stream(mut ctx: RunnerContext) {
    let key = stream_key(&ctx.thread_id, &ctx.task_id);
    tracing::info!(task_id = %ctx.task_id, thread_id = %ctx.thread_id, "Stream runner starting");

    update_registry(
        &ctx,
        TaskPatch {
            status: Some(TaskStatus::Running),
            current_step: Some("starting workflow".to_string()),
            ..Default::default()
        },
    )
    .await;

    let run = WorkflowRun {
        task_id: ctx.task_id.clone(),
        thread_id: ctx.thread_id.clone(),
        config: ctx.config.clone(),
    };

    let outcome = match ctx.engine.start(run).await {
        Ok(handle) => drive(&mut ctx, &key, handle).await,
        Err(e) => RunOutcome::Failed {
            message: e.to_string(),
        },
    };

    match outcome {
        RunOutcome::Completed { events } => {
            let payload = replay_end_payload(&ctx.task_id, &ctx.thread_id, events);
            append_event(&ctx, &key, EventKind::ReplayEnd, payload).await;
            update_registry(
                &ctx,
                TaskPatch {
                    status: Some(TaskStatus::Completed),
                    progress: Some(1.0),
                    current_step: Some(format!("completed ({events} events)")),
                    ..Default::default()
                },
            )
            .await;
            tracing::info!(task_id = %ctx.task_id, events, "Stream runner completed");
        }
        RunOutcome::Failed { message } => {
            let payload = error_payload(&ctx.task_id, &ctx.thread_id, &message, None);
            append_event(&ctx, &key, EventKind::Error, payload).await;
            update_registry(
                &ctx,
                TaskPatch {
                    status: Some(TaskStatus::Failed),
                    error_message: Some(message.clone()),
                    ..Default::default()
                },
            )
            .await;
            tracing::error!(task_id = %ctx.task_id, error = %message, "Stream runner failed");
        }
        RunOutcome::Cancelled => {
            let payload =
                error_payload(&ctx.task_id, &ctx.thread_id, "task cancelled", Some("cancelled"));
            append_event(&ctx, &key, EventKind::Error, payload).await;
            update_registry(
                &ctx,
                TaskPatch {
                    status: Some(TaskStatus::Cancelled),
                    current_step: Some("cancelled".to_string()),
                    ..Default::default()
                },
            )
            .await;
            tracing::info!(task_id = %ctx.task_id, "Stream runner cancelled");
        }
    }

    let _ = ctx.manager.cast(TaskManagerMsg::RunnerFinished {
        task_id: ctx.task_id.clone(),
    });
}

async fn drive(ctx: &mut RunnerContext, key: &str, mut handle: EngineHandle) -> RunOutcome {
    let mut appended: u64 = 0;

    loop {
        let event = tokio::select! {
            _ = ctx.cancel.changed() => return RunOutcome::Cancelled,
            event = handle.events.recv() => event,
        };
        let Some(event) = event else {
            return RunOutcome::Completed { events: appended };
        };

        match event {
            EngineEvent::Failed { message } => return RunOutcome::Failed { message },
            EngineEvent::Unknown { kind, .. } => {
                tracing::warn!(task_id = %ctx.task_id, kind = %kind, "Dropping unknown engine event");
                continue;
            }
            EngineEvent::Interrupt { id, content, options } => {
                let payload =
                    interrupt_payload(&ctx.task_id, &ctx.thread_id, &id, &content, &options);
                append_event(ctx, key, EventKind::Interrupt, payload).await;
                appended += 1;

                update_registry(
                    ctx,
                    TaskPatch {
                        current_step: Some("awaiting interrupt feedback".to_string()),
                        ..Default::default()
                    },
                )
                .await;

                let (slot, feedback_rx) = oneshot::channel();
                let _ = ctx.manager.cast(TaskManagerMsg::AwaitingFeedback {
                    task_id: ctx.task_id.clone(),
                    slot,
                });

                let feedback = tokio::select! {
                    _ = ctx.cancel.changed() => return RunOutcome::Cancelled,
                    feedback = feedback_rx => match feedback {
                        Ok(feedback) => feedback,
                        // Slot dropped without feedback: cancellation race.
                        Err(_) => return RunOutcome::Cancelled,
                    },
                };

                if handle.resume.send(feedback).await.is_err() {
                    return RunOutcome::Failed {
                        message: "engine dropped its resume channel".to_string(),
                    };
                }
                update_registry(
                    ctx,
                    TaskPatch {
                        current_step: Some("resumed after feedback".to_string()),
                        ..Default::default()
                    },
                )
                .await;
            }
            other => {
                let Some((kind, payload)) = translate(&ctx.task_id, &ctx.thread_id, other) else {
                    continue;
                };
                append_event(ctx, key, kind, payload).await;
                appended += 1;
            }
        }

        if appended > 0 && appended % PROGRESS_EVERY == 0 {
            let progress = (appended as f64 / 200.0).min(0.9);
            update_registry(
                ctx,
                TaskPatch {
                    progress: Some(progress),
                    current_step: Some(format!("processing events ({appended})")),
                    ..Default::default()
                },
            )
            .await;
        }
    }
}

// ============================================================================
// Engine-to-canonical translation
// ============================================================================

/// Maps one engine event to its canonical kind and payload. Returns `None`
/// when nothing is worth persisting (e.g. a chunk batch that filters to
/// empty). Interrupts, failures, and unknown kinds are handled by the
/// drive loop before translation.
fn translate(
    task_id: &str,
    thread_id: &str,
    event: EngineEvent,
) -> Option<(EventKind, serde_json::Value)> {
    match event {
        EngineEvent::MessageChunk {
            agent,
            id,
            content,
            reasoning_content,
            finish_reason,
        } => {
            let mut payload = base_payload(task_id, thread_id, &agent, &id);
            payload.insert("content".to_string(), content.into());
            if let Some(reasoning) = reasoning_content {
                payload.insert("reasoning_content".to_string(), reasoning.into());
            }
            if let Some(reason) = finish_reason {
                payload.insert("finish_reason".to_string(), reason.into());
            }
            Some((EventKind::MessageChunk, payload.into()))
        }
        EngineEvent::ToolCalls {
            agent,
            id,
            tool_calls,
            chunks,
        } => {
            let mut payload = base_payload(task_id, thread_id, &agent, &id);
            payload.insert(
                "tool_calls".to_string(),
                serde_json::to_value(tool_calls).unwrap_or_default(),
            );
            payload.insert(
                "tool_call_chunks".to_string(),
                serde_json::to_value(chunks).unwrap_or_default(),
            );
            Some((EventKind::ToolCalls, payload.into()))
        }
        EngineEvent::ToolCallChunks { agent, id, chunks } => {
            let kept: Vec<ToolCallChunk> =
                chunks.into_iter().filter(keep_tool_call_chunk).collect();
            if kept.is_empty() {
                return None;
            }
            let mut payload = base_payload(task_id, thread_id, &agent, &id);
            payload.insert(
                "tool_call_chunks".to_string(),
                serde_json::to_value(kept).unwrap_or_default(),
            );
            Some((EventKind::ToolCallChunks, payload.into()))
        }
        EngineEvent::ToolCallResult {
            agent,
            id,
            tool_call_id,
            content,
        } => {
            let mut payload = base_payload(task_id, thread_id, &agent, &id);
            payload.insert("content".to_string(), content.into());
            payload.insert("tool_call_id".to_string(), tool_call_id.into());
            Some((EventKind::ToolCallResult, payload.into()))
        }
        EngineEvent::PhaseStart { topic } => {
            // The research id doubles as the message id so clients can key
            // the ongoing research card.
            let mut payload = base_payload(task_id, thread_id, "researcher", task_id);
            payload.insert("research_id".to_string(), task_id.to_string().into());
            payload.insert("task_id".to_string(), task_id.to_string().into());
            payload.insert(
                "content".to_string(),
                "Starting research investigation...".into(),
            );
            payload.insert("status".to_string(), "running".into());
            payload.insert("topic".to_string(), topic.clone().into());
            payload.insert("research_topic".to_string(), topic.into());
            Some((EventKind::ResearchStart, payload.into()))
        }
        EngineEvent::PhaseEnd => {
            let mut payload = base_payload(task_id, thread_id, "reporter", task_id);
            payload.insert("research_id".to_string(), task_id.to_string().into());
            payload.insert(
                "content".to_string(),
                "Research investigation complete".into(),
            );
            payload.insert("status".to_string(), "completed".into());
            payload.insert("finish_reason".to_string(), "completed".into());
            Some((EventKind::ResearchEnd, payload.into()))
        }
        EngineEvent::Interrupt { .. } | EngineEvent::Failed { .. } | EngineEvent::Unknown { .. } => {
            None
        }
    }
}

fn base_payload(
    task_id: &str,
    thread_id: &str,
    agent: &str,
    id: &str,
) -> serde_json::Map<String, serde_json::Value> {
    let mut payload = serde_json::Map::new();
    payload.insert("thread_id".to_string(), thread_id.to_string().into());
    payload.insert("query_id".to_string(), task_id.to_string().into());
    payload.insert("agent".to_string(), agent.to_string().into());
    payload.insert("id".to_string(), id.to_string().into());
    payload.insert("role".to_string(), "assistant".into());
    payload
}

fn interrupt_payload(
    task_id: &str,
    thread_id: &str,
    id: &str,
    content: &str,
    options: &[InterruptOption],
) -> serde_json::Value {
    let mut payload = base_payload(task_id, thread_id, "system", id);
    payload.insert("task_id".to_string(), task_id.to_string().into());
    payload.insert("content".to_string(), content.to_string().into());
    payload.insert("finish_reason".to_string(), "interrupt".into());
    payload.insert(
        "options".to_string(),
        serde_json::to_value(options).unwrap_or_default(),
    );
    payload.into()
}

fn replay_end_payload(task_id: &str, thread_id: &str, events: u64) -> serde_json::Value {
    let mut payload = base_payload(task_id, thread_id, "reporter", task_id);
    payload.insert("finish_reason".to_string(), "completed".into());
    payload.insert("event_count".to_string(), events.into());
    payload.into()
}

fn error_payload(
    task_id: &str,
    thread_id: &str,
    message: &str,
    reason: Option<&str>,
) -> serde_json::Value {
    let error_id = format!("error-{task_id}");
    let mut payload = base_payload(task_id, thread_id, "system", &error_id);
    payload.insert("content".to_string(), message.to_string().into());
    payload.insert("message".to_string(), message.to_string().into());
    payload.insert("finish_reason".to_string(), "error".into());
    if let Some(reason) = reason {
        payload.insert("reason".to_string(), reason.to_string().into());
    }
    payload.into()
}

/// Whether a streamed tool-call fragment carries enough signal to persist.
/// Nameless chunks with empty args are model noise; so are bare one- or
/// two-character fragments outside the known separator set.
fn keep_tool_call_chunk(chunk: &ToolCallChunk) -> bool {
    let Some(args) = chunk.args.as_deref() else {
        return false;
    };
    let trimmed = args.trim();
    if trimmed.is_empty() {
        return false;
    }
    if chunk.name.is_some() || chunk.id.is_some() {
        return true;
    }
    if trimmed.len() <= 2 {
        const MEANINGFUL: [&str; 5] = [": ", ", ", "\" ", "}", "];"];
        return MEANINGFUL.contains(&trimmed);
    }
    true
}

// ============================================================================
// Side effects
// ============================================================================

/// Appends are best-effort from the runner's point of view: a transport
/// failure is logged and the workflow keeps going.
async fn append_event(ctx: &RunnerContext, key: &str, kind: EventKind, data: serde_json::Value) {
    if let Err(e) = event_log::append(&ctx.event_log, key, kind, &ctx.thread_id, data).await {
        tracing::warn!(
            task_id = %ctx.task_id,
            kind = %kind,
            error = %e,
            "Failed to append event"
        );
    }
}

async fn update_registry(ctx: &RunnerContext, patch: TaskPatch) {
    if let Err(e) = task_registry::update(&ctx.registry, &ctx.task_id, patch).await {
        tracing::warn!(task_id = %ctx.task_id, error = %e, "Failed to update task info");
    }
}

//! Replayer: serves one client's SSE view of a task stream.
//!
//! Ranges history in batches, then (in continuous mode) tails live appends
//! until the stream's terminal event arrives. Replayers are independent
//! fan-out readers: they never share cursors, and a client disconnect tears
//! this session down without touching the task.
//!
//! Cursor discipline: after forwarding an event the cursor advances to
//! `next(id)`, never to `id` itself. Reusing a delivered ID re-reads that
//! event on every poll.

use std::convert::Infallible;

use axum::response::sse;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::actors::event_log;
use crate::actors::task_registry::{self, TaskRegistryMsg};
use crate::app_state::AppState;
use crate::events::{stream_key, StoredEvent};
use crate::stream_id::Offset;

/// Validated replay request.
#[derive(Debug, Clone)]
pub struct ReplayParams {
    pub thread_id: String,
    /// A task ID, or None / `default` / `latest` for the thread's newest
    /// non-cancelled task.
    pub query_id: Option<String>,
    pub offset: Offset,
    pub continuous: bool,
}

/// Builds the SSE event stream for one replay session. The pump runs as
/// its own task; dropping the returned stream (client disconnect) closes
/// the channel and the pump exits on its next send.
pub fn sse_stream(
    state: AppState,
    params: ReplayParams,
) -> impl Stream<Item = Result<sse::Event, Infallible>> {
    let (tx, rx) = mpsc::channel::<sse::Event>(32);
    tokio::spawn(pump(state, params, tx));
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok(event), rx))
    })
}

async fn pump(state: AppState, params: ReplayParams, tx: mpsc::Sender<sse::Event>) {
    let registry = state.registry();
    let log = state.event_log();
    let batch_size = state.config().replay_batch.max(1);
    let block_ms = state.config().tail_block_ms;

    // Resolve the `default`/`latest` alias to a concrete task.
    let aliased = matches!(params.query_id.as_deref(), None | Some("default") | Some("latest"));
    let task_id = if aliased {
        match task_registry::find_latest_by_thread(&registry, &params.thread_id).await {
            Ok(Some(info)) => info.task_id,
            Ok(None) => {
                tracing::info!(thread_id = %params.thread_id, "No task to replay for thread");
                send_replay_end(&tx, &params, None, "static", 0).await;
                return;
            }
            Err(e) => {
                tracing::warn!(thread_id = %params.thread_id, error = %e, "Alias resolution failed");
                send_replay_end(&tx, &params, None, "static", 0).await;
                return;
            }
        }
    } else {
        params.query_id.clone().unwrap_or_default()
    };

    let key = stream_key(&params.thread_id, &task_id);
    let mut cursor = params.offset.lower_bound();
    let mut sent: u64 = 0;
    let mut saw_terminal = false;

    tracing::info!(
        thread_id = %params.thread_id,
        query_id = %task_id,
        offset = %params.offset,
        continuous = params.continuous,
        "Replay starting"
    );

    // Historical phase: drain everything already in the stream.
    loop {
        let batch = match event_log::range(&log, &key, cursor, Offset::End, batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(stream_key = %key, error = %e, "Historical range read failed");
                break;
            }
        };
        let got = batch.len();
        for event in batch {
            if forward(&tx, &event).await.is_err() {
                return; // client went away
            }
            cursor = event.id.next();
            sent += 1;
            saw_terminal |= event.kind.is_terminal();
        }
        if got < batch_size {
            break;
        }
    }

    // Continuous phase: follow live appends until the stream terminates.
    if params.continuous && !saw_terminal {
        loop {
            if tx.is_closed() {
                return;
            }
            let batch = match event_log::tail(&log, &key, cursor, block_ms, batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(stream_key = %key, error = %e, "Tail read failed");
                    break;
                }
            };
            if batch.is_empty() {
                // Only stop once the task is terminal AND the tail came back
                // empty; checking in this order cannot lose trailing events.
                if task_is_terminal(&registry, &task_id).await {
                    break;
                }
                continue;
            }
            for event in batch {
                if forward(&tx, &event).await.is_err() {
                    return;
                }
                cursor = event.id.next();
                sent += 1;
                saw_terminal |= event.kind.is_terminal();
            }
            if saw_terminal {
                break;
            }
        }
    }

    let mode = if params.continuous { "continuous" } else { "static" };
    send_replay_end(&tx, &params, Some(&task_id), mode, sent).await;
    tracing::info!(
        thread_id = %params.thread_id,
        query_id = %task_id,
        mode,
        total_events = sent,
        "Replay finished"
    );
}

/// One SSE frame per stored event. The frame's SSE `id` is the stream ID,
/// so `next(Last-Event-ID)` is a valid reconnect offset.
async fn forward(
    tx: &mpsc::Sender<sse::Event>,
    event: &StoredEvent,
) -> Result<(), mpsc::error::SendError<sse::Event>> {
    let frame = match sse::Event::default()
        .event(event.kind.as_str())
        .id(event.id.to_string())
        .json_data(&event.data)
    {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(id = %event.id, error = %e, "Unserializable event payload, skipping");
            return Ok(());
        }
    };
    tx.send(frame).await
}

/// Synthetic end-of-replay summary; not part of the stored stream.
async fn send_replay_end(
    tx: &mpsc::Sender<sse::Event>,
    params: &ReplayParams,
    task_id: Option<&str>,
    mode: &str,
    total_events: u64,
) {
    let payload = serde_json::json!({
        "thread_id": params.thread_id,
        "query_id": task_id,
        "mode": mode,
        "total_events": total_events,
    });
    if let Ok(frame) = sse::Event::default().event("replay_end").json_data(&payload) {
        let _ = tx.send(frame).await;
    }
}

async fn task_is_terminal(registry: &ractor::ActorRef<TaskRegistryMsg>, task_id: &str) -> bool {
    match task_registry::get(registry, task_id).await {
        Ok(Some(info)) => info.status.is_terminal(),
        // Unknown task: nothing will ever append, so stop following.
        Ok(None) => true,
        Err(e) => {
            tracing::warn!(task_id = %task_id, error = %e, "Terminal-state check failed");
            true
        }
    }
}

//! TaskManagerActor - task creation, admission, and runner lifecycles.
//!
//! The manager is the only writer of TaskInfo on behalf of runners and the
//! only owner of runner handles. Admission is FIFO among pending tasks
//! under a configurable concurrency ceiling; excess tasks stay pending
//! until a slot frees. Cancellation signals the runner through a watch
//! channel; interrupt feedback is a single-slot rendezvous (first feedback
//! wins, later submitters get `NotWaiting`).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use tokio::sync::{oneshot, watch};

use crate::actors::event_log::{self, EventLogError, EventLogMsg};
use crate::actors::task_registry::{
    self, StatusCounts, TaskPatch, TaskRegistryError, TaskRegistryMsg,
};
use crate::engine::WorkflowEngine;
use crate::events::stream_key;
use crate::runner::{self, RunnerContext};
use crate::task::{TaskConfig, TaskInfo, TaskStatus};

/// Actor that owns task admission and runner lifecycles
#[derive(Debug, Default)]
pub struct TaskManagerActor;

/// Arguments for spawning TaskManagerActor
pub struct TaskManagerArguments {
    pub registry: ActorRef<TaskRegistryMsg>,
    pub event_log: ActorRef<EventLogMsg>,
    pub engine: Arc<dyn WorkflowEngine>,
    pub max_concurrent: usize,
}

/// State for TaskManagerActor
pub struct TaskManagerState {
    registry: ActorRef<TaskRegistryMsg>,
    event_log: ActorRef<EventLogMsg>,
    engine: Arc<dyn WorkflowEngine>,
    max_concurrent: usize,
    /// FIFO admission queue of pending task IDs.
    pending: VecDeque<String>,
    running: HashMap<String, RunningTask>,
    started_at: Instant,
}

struct RunningTask {
    cancel: watch::Sender<bool>,
    /// Present while the runner is parked on an interrupt.
    feedback: Option<oneshot::Sender<String>>,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The cancel signal was delivered (or the queued task marked).
    Cancelled,
    /// The task had already finished; cancelling is a no-op success.
    AlreadyTerminal,
}

/// Worker statistics surfaced at `/worker/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub is_running: bool,
    pub total_tasks: u64,
    pub pending_tasks: u64,
    pub running_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    pub max_concurrent_tasks: usize,
    pub running_task_ids: Vec<String>,
    pub available_slots: usize,
    pub uptime_seconds: u64,
}

/// Messages handled by TaskManagerActor
#[derive(Debug)]
pub enum TaskManagerMsg {
    CreateTask {
        thread_id: String,
        user_input: String,
        config: TaskConfig,
        reply: RpcReplyPort<Result<TaskInfo, TaskManagerError>>,
    },
    CancelTask {
        task_id: String,
        reply: RpcReplyPort<Result<CancelOutcome, TaskManagerError>>,
    },
    SubmitFeedback {
        task_id: String,
        option: String,
        reply: RpcReplyPort<Result<(), TaskManagerError>>,
    },
    GetStats {
        reply: RpcReplyPort<Result<WorkerStats, TaskManagerError>>,
    },
    /// Delete finalized tasks older than the cutoff along with their event
    /// streams; replies with the number of tasks removed.
    Cleanup {
        older_than_days: u32,
        reply: RpcReplyPort<Result<u64, TaskManagerError>>,
    },
    /// Internal: fill free slots from the pending queue.
    TryAdmit,
    /// Internal: a runner parked on an interrupt and handed over its slot.
    AwaitingFeedback {
        task_id: String,
        slot: oneshot::Sender<String>,
    },
    /// Internal: a runner exited; free its slot.
    RunnerFinished { task_id: String },
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TaskManagerError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {0} is not awaiting interrupt feedback")]
    NotWaiting(String),

    #[error(transparent)]
    Registry(#[from] TaskRegistryError),

    #[error(transparent)]
    EventLog(#[from] EventLogError),
}

// ============================================================================
// Actor
// ============================================================================

#[async_trait]
impl Actor for TaskManagerActor {
    type Msg = TaskManagerMsg;
    type State = TaskManagerState;
    type Arguments = TaskManagerArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            max_concurrent = args.max_concurrent,
            "TaskManagerActor starting"
        );
        Ok(TaskManagerState {
            registry: args.registry,
            event_log: args.event_log,
            engine: args.engine,
            max_concurrent: args.max_concurrent.max(1),
            pending: VecDeque::new(),
            running: HashMap::new(),
            started_at: Instant::now(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TaskManagerMsg::CreateTask {
                thread_id,
                user_input,
                config,
                reply,
            } => {
                let result = Self::create_task(state, thread_id, user_input, config).await;
                let _ = reply.send(result);
                let _ = myself.cast(TaskManagerMsg::TryAdmit);
            }
            TaskManagerMsg::CancelTask { task_id, reply } => {
                let _ = reply.send(Self::cancel_task(state, &task_id).await);
            }
            TaskManagerMsg::SubmitFeedback {
                task_id,
                option,
                reply,
            } => {
                let _ = reply.send(Self::submit_feedback(state, &task_id, option).await);
            }
            TaskManagerMsg::GetStats { reply } => {
                let _ = reply.send(Self::stats(state).await);
            }
            TaskManagerMsg::Cleanup {
                older_than_days,
                reply,
            } => {
                let _ = reply.send(Self::cleanup(state, older_than_days).await);
            }
            TaskManagerMsg::TryAdmit => {
                Self::admit_pending(state, &myself).await;
            }
            TaskManagerMsg::AwaitingFeedback { task_id, slot } => {
                match state.running.get_mut(&task_id) {
                    Some(running) => running.feedback = Some(slot),
                    // Cancel race: dropping the slot unparks the runner,
                    // which then observes its cancel signal.
                    None => drop(slot),
                }
            }
            TaskManagerMsg::RunnerFinished { task_id } => {
                state.running.remove(&task_id);
                tracing::debug!(task_id = %task_id, "Runner finished, slot freed");
                let _ = myself.cast(TaskManagerMsg::TryAdmit);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

impl TaskManagerActor {
    async fn create_task(
        state: &mut TaskManagerState,
        thread_id: String,
        user_input: String,
        config: TaskConfig,
    ) -> Result<TaskInfo, TaskManagerError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let info = TaskInfo::new(task_id.clone(), thread_id.clone(), user_input, config);
        task_registry::create(&state.registry, info.clone()).await?;
        state.pending.push_back(task_id.clone());
        tracing::info!(task_id = %task_id, thread_id = %thread_id, "Task created");
        Ok(info)
    }

    async fn admit_pending(state: &mut TaskManagerState, myself: &ActorRef<TaskManagerMsg>) {
        while state.running.len() < state.max_concurrent {
            let Some(task_id) = state.pending.pop_front() else {
                break;
            };
            let info = match task_registry::get(&state.registry, &task_id).await {
                Ok(Some(info)) if info.status == TaskStatus::Pending => info,
                Ok(_) => continue, // cancelled while queued, or evicted
                Err(e) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Admission lookup failed");
                    state.pending.push_front(task_id);
                    break;
                }
            };

            let (cancel_tx, cancel_rx) = watch::channel(false);
            state.running.insert(
                task_id.clone(),
                RunningTask {
                    cancel: cancel_tx,
                    feedback: None,
                },
            );

            let ctx = RunnerContext {
                task_id: info.task_id.clone(),
                thread_id: info.thread_id.clone(),
                config: info.config.clone(),
                engine: state.engine.clone(),
                event_log: state.event_log.clone(),
                registry: state.registry.clone(),
                manager: myself.clone(),
                cancel: cancel_rx,
            };
            tokio::spawn(runner::run_stream(ctx));
            tracing::info!(task_id = %task_id, "Task admitted");
        }
    }

    async fn cancel_task(
        state: &mut TaskManagerState,
        task_id: &str,
    ) -> Result<CancelOutcome, TaskManagerError> {
        if let Some(running) = state.running.get_mut(task_id) {
            let _ = running.cancel.send(true);
            // Unpark an interrupted runner so it can observe the signal.
            running.feedback = None;
            tracing::info!(task_id = %task_id, "Cancel signalled to runner");
            return Ok(CancelOutcome::Cancelled);
        }

        let info = task_registry::get(&state.registry, task_id)
            .await?
            .ok_or_else(|| TaskManagerError::NotFound(task_id.to_string()))?;

        if info.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        // Still queued (or orphaned): finalize directly.
        state.pending.retain(|queued| queued != task_id);
        task_registry::update(
            &state.registry,
            task_id,
            TaskPatch {
                status: Some(TaskStatus::Cancelled),
                current_step: Some("cancelled before start".to_string()),
                ..Default::default()
            },
        )
        .await?;
        tracing::info!(task_id = %task_id, "Queued task cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    async fn submit_feedback(
        state: &mut TaskManagerState,
        task_id: &str,
        option: String,
    ) -> Result<(), TaskManagerError> {
        let Some(running) = state.running.get_mut(task_id) else {
            return match task_registry::get(&state.registry, task_id).await? {
                Some(_) => Err(TaskManagerError::NotWaiting(task_id.to_string())),
                None => Err(TaskManagerError::NotFound(task_id.to_string())),
            };
        };

        match running.feedback.take() {
            Some(slot) => slot
                .send(option)
                .map_err(|_| TaskManagerError::NotWaiting(task_id.to_string())),
            None => Err(TaskManagerError::NotWaiting(task_id.to_string())),
        }
    }

    async fn stats(state: &TaskManagerState) -> Result<WorkerStats, TaskManagerError> {
        let counts: StatusCounts =
            ractor::call!(state.registry, |reply| TaskRegistryMsg::CountByStatus { reply })
                .map_err(|e| TaskRegistryError::Unavailable(e.to_string()))
                .map_err(TaskManagerError::from)??;

        let mut running_task_ids: Vec<String> = state.running.keys().cloned().collect();
        running_task_ids.sort();

        Ok(WorkerStats {
            is_running: true,
            total_tasks: counts.total(),
            pending_tasks: counts.pending,
            running_tasks: counts.running,
            completed_tasks: counts.completed,
            failed_tasks: counts.failed,
            cancelled_tasks: counts.cancelled,
            max_concurrent_tasks: state.max_concurrent,
            available_slots: state.max_concurrent.saturating_sub(state.running.len()),
            running_task_ids,
            uptime_seconds: state.started_at.elapsed().as_secs(),
        })
    }

    async fn cleanup(
        state: &TaskManagerState,
        older_than_days: u32,
    ) -> Result<u64, TaskManagerError> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days as i64);
        let finished: Vec<TaskInfo> =
            ractor::call!(state.registry, |reply| TaskRegistryMsg::FinishedBefore {
                cutoff,
                reply,
            })
            .map_err(|e| TaskRegistryError::Unavailable(e.to_string()))
            .map_err(TaskManagerError::from)??;

        let mut cleaned = 0u64;
        for info in finished {
            let key = stream_key(&info.thread_id, &info.task_id);
            if let Err(e) = event_log::delete(&state.event_log, &key).await {
                tracing::warn!(task_id = %info.task_id, error = %e, "Stream delete failed");
            }
            let deleted =
                ractor::call!(state.registry, |reply| TaskRegistryMsg::Delete {
                    task_id: info.task_id.clone(),
                    reply,
                })
                .map_err(|e| TaskRegistryError::Unavailable(e.to_string()))
                .map_err(TaskManagerError::from)??;
            if deleted {
                cleaned += 1;
            }
        }
        tracing::info!(cleaned, older_than_days, "Cleanup finished");
        Ok(cleaned)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn unavailable<T>(e: ractor::RactorErr<T>) -> TaskManagerError {
    TaskManagerError::Registry(TaskRegistryError::Unavailable(e.to_string()))
}

pub async fn create_task(
    manager: &ActorRef<TaskManagerMsg>,
    thread_id: impl AsRef<str>,
    user_input: impl AsRef<str>,
    config: TaskConfig,
) -> Result<TaskInfo, TaskManagerError> {
    ractor::call!(manager, |reply| TaskManagerMsg::CreateTask {
        thread_id: thread_id.as_ref().to_string(),
        user_input: user_input.as_ref().to_string(),
        config,
        reply,
    })
    .map_err(unavailable)?
}

pub async fn cancel_task(
    manager: &ActorRef<TaskManagerMsg>,
    task_id: impl AsRef<str>,
) -> Result<CancelOutcome, TaskManagerError> {
    ractor::call!(manager, |reply| TaskManagerMsg::CancelTask {
        task_id: task_id.as_ref().to_string(),
        reply,
    })
    .map_err(unavailable)?
}

pub async fn submit_feedback(
    manager: &ActorRef<TaskManagerMsg>,
    task_id: impl AsRef<str>,
    option: impl AsRef<str>,
) -> Result<(), TaskManagerError> {
    ractor::call!(manager, |reply| TaskManagerMsg::SubmitFeedback {
        task_id: task_id.as_ref().to_string(),
        option: option.as_ref().to_string(),
        reply,
    })
    .map_err(unavailable)?
}

// ============================================================================
// Tests
// ============================================================================

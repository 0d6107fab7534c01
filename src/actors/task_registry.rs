//! TaskRegistryActor - the authoritative record of every task.
//!
//! Owns the `tasks` table: creation, guarded updates, thread-indexed
//! queries, and TTL eviction. All TaskInfo mutation flows through `Update`,
//! which enforces the lifecycle state machine (terminal states are frozen),
//! clamps progress to [0, 1] and keeps it monotone, stamps
//! `started_at`/`completed_at`, and recomputes the row's expiry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::Connection;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;

use crate::task::{TaskConfig, TaskInfo, TaskStatus};

/// Actor that owns task records
#[derive(Debug, Default)]
pub struct TaskRegistryActor;

/// Storage backing for the registry
#[derive(Debug, Clone)]
pub enum TaskStore {
    File(String),
    InMemory,
}

/// Arguments for spawning TaskRegistryActor
#[derive(Debug, Clone)]
pub struct TaskRegistryArguments {
    pub store: TaskStore,
    /// Days a task survives past `completed_at` (or `created_at` while
    /// non-terminal).
    pub ttl_days: u32,
    /// Interval of the expiry sweep tick.
    pub sweep_interval: Duration,
}

impl TaskRegistryArguments {
    pub fn in_memory(ttl_days: u32) -> Self {
        Self {
            store: TaskStore::InMemory,
            ttl_days,
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// State for TaskRegistryActor
pub struct TaskRegistryState {
    conn: Connection,
    ttl_days: u32,
}

// ============================================================================
// Messages
// ============================================================================

/// Partial update applied through the state-machine guard.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<f64>,
    pub current_step: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub thread_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}

/// Task counts per lifecycle state.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}

/// Messages handled by TaskRegistryActor
#[derive(Debug)]
pub enum TaskRegistryMsg {
    Create {
        info: TaskInfo,
        reply: RpcReplyPort<Result<(), TaskRegistryError>>,
    },
    Get {
        task_id: String,
        reply: RpcReplyPort<Result<Option<TaskInfo>, TaskRegistryError>>,
    },
    Update {
        task_id: String,
        patch: TaskPatch,
        reply: RpcReplyPort<Result<TaskInfo, TaskRegistryError>>,
    },
    List {
        filter: TaskFilter,
        reply: RpcReplyPort<Result<Vec<TaskInfo>, TaskRegistryError>>,
    },
    Delete {
        task_id: String,
        reply: RpcReplyPort<Result<bool, TaskRegistryError>>,
    },
    /// Most recently created task on the thread whose status is not
    /// cancelled; resolves the `default`/`latest` replay alias.
    FindLatestByThread {
        thread_id: String,
        reply: RpcReplyPort<Result<Option<TaskInfo>, TaskRegistryError>>,
    },
    FindRunningByThread {
        thread_id: String,
        reply: RpcReplyPort<Result<Option<TaskInfo>, TaskRegistryError>>,
    },
    CountByStatus {
        reply: RpcReplyPort<Result<StatusCounts, TaskRegistryError>>,
    },
    /// Terminal tasks whose `completed_at` precedes the cutoff; feeds the
    /// cleanup sweep.
    FinishedBefore {
        cutoff: DateTime<Utc>,
        reply: RpcReplyPort<Result<Vec<TaskInfo>, TaskRegistryError>>,
    },
    /// Delete rows past their expiry; replies with the evicted count.
    SweepExpired {
        reply: RpcReplyPort<Result<u64, TaskRegistryError>>,
    },
    /// Internal: periodic expiry sweep.
    Tick,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone)]
pub enum TaskRegistryError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task registry unavailable: {0}")]
    Unavailable(String),
}

impl From<libsql::Error> for TaskRegistryError {
    fn from(e: libsql::Error) -> Self {
        TaskRegistryError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for TaskRegistryError {
    fn from(e: serde_json::Error) -> Self {
        TaskRegistryError::Serialization(e.to_string())
    }
}

// ============================================================================
// Actor
// ============================================================================

#[async_trait]
impl Actor for TaskRegistryActor {
    type Msg = TaskRegistryMsg;
    type State = TaskRegistryState;
    type Arguments = TaskRegistryArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let conn = match &args.store {
            TaskStore::File(path) => match Self::open(path).await {
                Ok(conn) => {
                    tracing::info!(database_path = %path, "Task registry opened");
                    conn
                }
                Err(e) => {
                    tracing::warn!(
                        database_path = %path,
                        error = %e,
                        "Task registry database unreachable, falling back to in-memory store"
                    );
                    Self::open(":memory:").await.map_err(|e| {
                        ActorProcessingErr::from(format!("Failed to open in-memory store: {e}"))
                    })?
                }
            },
            TaskStore::InMemory => Self::open(":memory:").await.map_err(|e| {
                ActorProcessingErr::from(format!("Failed to open in-memory store: {e}"))
            })?,
        };

        let tick_ref = myself.clone();
        let interval = args.sweep_interval.max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh spawn
            // does not race test fixtures.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tick_ref.cast(TaskRegistryMsg::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(TaskRegistryState {
            conn,
            ttl_days: args.ttl_days,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TaskRegistryMsg::Create { info, reply } => {
                let _ = reply.send(Self::insert(state, &info).await);
            }
            TaskRegistryMsg::Get { task_id, reply } => {
                let _ = reply.send(Self::fetch(&state.conn, &task_id).await);
            }
            TaskRegistryMsg::Update {
                task_id,
                patch,
                reply,
            } => {
                let _ = reply.send(Self::apply_patch(state, &task_id, patch).await);
            }
            TaskRegistryMsg::List { filter, reply } => {
                let _ = reply.send(Self::list(&state.conn, filter).await);
            }
            TaskRegistryMsg::Delete { task_id, reply } => {
                let _ = reply.send(Self::remove(&state.conn, &task_id).await);
            }
            TaskRegistryMsg::FindLatestByThread { thread_id, reply } => {
                let _ = reply.send(Self::latest_by_thread(&state.conn, &thread_id).await);
            }
            TaskRegistryMsg::FindRunningByThread { thread_id, reply } => {
                let _ = reply.send(Self::running_by_thread(&state.conn, &thread_id).await);
            }
            TaskRegistryMsg::CountByStatus { reply } => {
                let _ = reply.send(Self::count_by_status(&state.conn).await);
            }
            TaskRegistryMsg::FinishedBefore { cutoff, reply } => {
                let _ = reply.send(Self::finished_before(&state.conn, cutoff).await);
            }
            TaskRegistryMsg::SweepExpired { reply } => {
                let _ = reply.send(Self::sweep(&state.conn).await);
            }
            TaskRegistryMsg::Tick => match Self::sweep(&state.conn).await {
                Ok(0) => {}
                Ok(evicted) => tracing::info!(evicted, "Task registry evicted expired tasks"),
                Err(e) => tracing::warn!(error = %e, "Task registry expiry sweep failed"),
            },
        }
        Ok(())
    }
}

// ============================================================================
// Queries
// ============================================================================

fn fmt_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width form so text ordering matches time ordering.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, TaskRegistryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TaskRegistryError::Serialization(format!("bad timestamp {raw:?}: {e}")))
}

fn opt_text(value: Option<&str>) -> libsql::Value {
    match value {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn col_opt_text(row: &libsql::Row, idx: i32) -> Result<Option<String>, TaskRegistryError> {
    match row.get_value(idx).map_err(TaskRegistryError::from)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(s) => Ok(Some(s)),
        other => Err(TaskRegistryError::Serialization(format!(
            "unexpected column value: {other:?}"
        ))),
    }
}

const TASK_COLUMNS: &str = "task_id, thread_id, user_input, status, progress, current_step, \
     created_at, started_at, completed_at, error_message, config_json";

impl TaskRegistryActor {
    async fn open(path: &str) -> Result<Connection, libsql::Error> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let db = libsql::Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                user_input TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL,
                current_step TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                config_json TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
            (),
        )
        .await?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_thread ON tasks(thread_id, created_at)",
            (),
        )
        .await?;
        Ok(conn)
    }

    fn expiry_for(info: &TaskInfo, ttl_days: u32) -> DateTime<Utc> {
        info.completed_at.unwrap_or(info.created_at) + chrono::Duration::days(ttl_days as i64)
    }

    async fn insert(state: &TaskRegistryState, info: &TaskInfo) -> Result<(), TaskRegistryError> {
        let config_json = serde_json::to_string(&info.config)?;
        let expires_at = Self::expiry_for(info, state.ttl_days);
        state
            .conn
            .execute(
                r#"
                INSERT INTO tasks (task_id, thread_id, user_input, status, progress, current_step,
                                   created_at, started_at, completed_at, error_message, config_json,
                                   expires_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                libsql::params![
                    info.task_id.clone(),
                    info.thread_id.clone(),
                    info.user_input.clone(),
                    info.status.as_str(),
                    info.progress,
                    opt_text(info.current_step.as_deref()),
                    fmt_ts(info.created_at),
                    opt_text(info.started_at.map(fmt_ts).as_deref()),
                    opt_text(info.completed_at.map(fmt_ts).as_deref()),
                    opt_text(info.error_message.as_deref()),
                    config_json,
                    fmt_ts(expires_at)
                ],
            )
            .await?;
        Ok(())
    }

    fn row_to_task(row: &libsql::Row) -> Result<TaskInfo, TaskRegistryError> {
        let status: TaskStatus = row
            .get::<String>(3)?
            .parse()
            .map_err(|e: crate::task::InvalidTaskStatus| {
                TaskRegistryError::Serialization(e.to_string())
            })?;
        let config: TaskConfig = serde_json::from_str(&row.get::<String>(10)?)?;
        Ok(TaskInfo {
            task_id: row.get::<String>(0)?,
            thread_id: row.get::<String>(1)?,
            user_input: row.get::<String>(2)?,
            status,
            progress: row.get::<f64>(4)?,
            current_step: col_opt_text(row, 5)?,
            created_at: parse_ts(&row.get::<String>(6)?)?,
            started_at: col_opt_text(row, 7)?.as_deref().map(parse_ts).transpose()?,
            completed_at: col_opt_text(row, 8)?.as_deref().map(parse_ts).transpose()?,
            error_message: col_opt_text(row, 9)?,
            config,
        })
    }

    async fn fetch(conn: &Connection, task_id: &str) -> Result<Option<TaskInfo>, TaskRegistryError> {
        let mut rows = conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
                [task_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn apply_patch(
        state: &TaskRegistryState,
        task_id: &str,
        patch: TaskPatch,
    ) -> Result<TaskInfo, TaskRegistryError> {
        let mut info = Self::fetch(&state.conn, task_id)
            .await?
            .ok_or_else(|| TaskRegistryError::NotFound(task_id.to_string()))?;

        if let Some(next) = patch.status {
            if next != info.status {
                if !info.status.can_transition_to(next) {
                    return Err(TaskRegistryError::InvalidTransition {
                        task_id: task_id.to_string(),
                        from: info.status,
                        to: next,
                    });
                }
                let now = Utc::now();
                if next == TaskStatus::Running && info.started_at.is_none() {
                    info.started_at = Some(now);
                }
                if next.is_terminal() {
                    info.completed_at = Some(now);
                }
                info.status = next;
            }
        }
        if let Some(progress) = patch.progress {
            // Monotone and clamped; a lagging writer can never move it back.
            info.progress = info.progress.max(progress.clamp(0.0, 1.0));
        }
        if let Some(step) = patch.current_step {
            info.current_step = Some(step);
        }
        if let Some(message) = patch.error_message {
            info.error_message = Some(message);
        }

        let expires_at = Self::expiry_for(&info, state.ttl_days);
        state
            .conn
            .execute(
                r#"
                UPDATE tasks
                SET status = ?2, progress = ?3, current_step = ?4, started_at = ?5,
                    completed_at = ?6, error_message = ?7, expires_at = ?8
                WHERE task_id = ?1
                "#,
                libsql::params![
                    task_id,
                    info.status.as_str(),
                    info.progress,
                    opt_text(info.current_step.as_deref()),
                    opt_text(info.started_at.map(fmt_ts).as_deref()),
                    opt_text(info.completed_at.map(fmt_ts).as_deref()),
                    opt_text(info.error_message.as_deref()),
                    fmt_ts(expires_at)
                ],
            )
            .await?;
        Ok(info)
    }

    async fn list(conn: &Connection, filter: TaskFilter) -> Result<Vec<TaskInfo>, TaskRegistryError> {
        let limit = filter.limit.unwrap_or(20).max(1) as i64;
        let mut rows = match (&filter.thread_id, filter.status) {
            (Some(thread_id), Some(status)) => {
                conn.query(
                    &format!(
                        "SELECT {TASK_COLUMNS} FROM tasks WHERE thread_id = ?1 AND status = ?2 \
                         ORDER BY created_at DESC LIMIT ?3"
                    ),
                    libsql::params![thread_id.clone(), status.as_str(), limit],
                )
                .await?
            }
            (Some(thread_id), None) => {
                conn.query(
                    &format!(
                        "SELECT {TASK_COLUMNS} FROM tasks WHERE thread_id = ?1 \
                         ORDER BY created_at DESC LIMIT ?2"
                    ),
                    libsql::params![thread_id.clone(), limit],
                )
                .await?
            }
            (None, Some(status)) => {
                conn.query(
                    &format!(
                        "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 \
                         ORDER BY created_at DESC LIMIT ?2"
                    ),
                    libsql::params![status.as_str(), limit],
                )
                .await?
            }
            (None, None) => {
                conn.query(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC LIMIT ?1"),
                    libsql::params![limit],
                )
                .await?
            }
        };

        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            tasks.push(Self::row_to_task(&row)?);
        }
        Ok(tasks)
    }

    async fn remove(conn: &Connection, task_id: &str) -> Result<bool, TaskRegistryError> {
        let deleted = conn
            .execute("DELETE FROM tasks WHERE task_id = ?1", [task_id])
            .await?;
        Ok(deleted > 0)
    }

    async fn latest_by_thread(
        conn: &Connection,
        thread_id: &str,
    ) -> Result<Option<TaskInfo>, TaskRegistryError> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE thread_id = ?1 AND status != 'cancelled' \
                     ORDER BY created_at DESC LIMIT 1"
                ),
                [thread_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn running_by_thread(
        conn: &Connection,
        thread_id: &str,
    ) -> Result<Option<TaskInfo>, TaskRegistryError> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE thread_id = ?1 AND status = 'running' \
                     ORDER BY created_at DESC LIMIT 1"
                ),
                [thread_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn count_by_status(conn: &Connection) -> Result<StatusCounts, TaskRegistryError> {
        let mut rows = conn
            .query("SELECT status, COUNT(*) FROM tasks GROUP BY status", ())
            .await?;
        let mut counts = StatusCounts::default();
        while let Some(row) = rows.next().await? {
            let count = row.get::<i64>(1)? as u64;
            match row.get::<String>(0)?.parse::<TaskStatus>() {
                Ok(TaskStatus::Pending) => counts.pending = count,
                Ok(TaskStatus::Running) => counts.running = count,
                Ok(TaskStatus::Completed) => counts.completed = count,
                Ok(TaskStatus::Failed) => counts.failed = count,
                Ok(TaskStatus::Cancelled) => counts.cancelled = count,
                Err(e) => {
                    return Err(TaskRegistryError::Serialization(e.to_string()));
                }
            }
        }
        Ok(counts)
    }

    async fn finished_before(
        conn: &Connection,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TaskInfo>, TaskRegistryError> {
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?1"
                ),
                [fmt_ts(cutoff)],
            )
            .await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            tasks.push(Self::row_to_task(&row)?);
        }
        Ok(tasks)
    }

    async fn sweep(conn: &Connection) -> Result<u64, TaskRegistryError> {
        let evicted = conn
            .execute(
                "DELETE FROM tasks WHERE expires_at < ?1",
                [fmt_ts(Utc::now())],
            )
            .await?;
        Ok(evicted)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn unavailable<T>(e: ractor::RactorErr<T>) -> TaskRegistryError {
    TaskRegistryError::Unavailable(e.to_string())
}

pub async fn create(
    registry: &ActorRef<TaskRegistryMsg>,
    info: TaskInfo,
) -> Result<(), TaskRegistryError> {
    ractor::call!(registry, |reply| TaskRegistryMsg::Create { info, reply })
        .map_err(unavailable)?
}

pub async fn get(
    registry: &ActorRef<TaskRegistryMsg>,
    task_id: impl AsRef<str>,
) -> Result<Option<TaskInfo>, TaskRegistryError> {
    ractor::call!(registry, |reply| TaskRegistryMsg::Get {
        task_id: task_id.as_ref().to_string(),
        reply,
    })
    .map_err(unavailable)?
}

pub async fn update(
    registry: &ActorRef<TaskRegistryMsg>,
    task_id: impl AsRef<str>,
    patch: TaskPatch,
) -> Result<TaskInfo, TaskRegistryError> {
    ractor::call!(registry, |reply| TaskRegistryMsg::Update {
        task_id: task_id.as_ref().to_string(),
        patch,
        reply,
    })
    .map_err(unavailable)?
}

pub async fn find_latest_by_thread(
    registry: &ActorRef<TaskRegistryMsg>,
    thread_id: impl AsRef<str>,
) -> Result<Option<TaskInfo>, TaskRegistryError> {
    ractor::call!(registry, |reply| TaskRegistryMsg::FindLatestByThread {
        thread_id: thread_id.as_ref().to_string(),
        reply,
    })
    .map_err(unavailable)?
}

pub async fn find_running_by_thread(
    registry: &ActorRef<TaskRegistryMsg>,
    thread_id: impl AsRef<str>,
) -> Result<Option<TaskInfo>, TaskRegistryError> {
    ractor::call!(registry, |reply| TaskRegistryMsg::FindRunningByThread {
        thread_id: thread_id.as_ref().to_string(),
        reply,
    })
    .map_err(unavailable)?
}

// ============================================================================
// Tests
// ============================================================================

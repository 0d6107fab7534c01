//! EventLogActor - append-only per-task event streams.
//!
//! Redis-Streams-shaped contract over libsql: strictly increasing
//! `<ms>-<seq>` IDs per stream key, half-open range reads `(from, to]`,
//! and blocking tail reads. Tail readers are fan-out readers, not queue
//! consumers: every tailer sees every event independently.
//!
//! # Architecture
//!
//! - One actor owns all streams; the stream runner is the sole appender
//!   for its key, any number of replayers read concurrently
//! - Blocked tails park their reply port; an append on the key (or the
//!   100ms expiry tick) wakes them
//! - If the configured database file cannot be opened the actor falls back
//!   to an in-memory database with the same contract: the API stays live
//!   through the outage, history is lost on restart

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use libsql::Connection;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};

use crate::events::{EventKind, StoredEvent};
use crate::stream_id::{Offset, StreamId};

const WAITER_TICK_MS: u64 = 100;

/// Actor that owns the append-only event streams
#[derive(Debug, Default)]
pub struct EventLogActor;

/// Arguments for spawning EventLogActor
#[derive(Debug, Clone)]
pub enum EventLogArguments {
    /// File-based database path
    File(String),
    /// In-memory database (for testing)
    InMemory,
}

/// State for EventLogActor
pub struct EventLogState {
    conn: Connection,
    /// Highest ID handed out per key; keeps appends strictly increasing
    /// even across wall-clock regression.
    last_ids: HashMap<String, StreamId>,
    /// Parked tail readers awaiting new events or their deadline.
    waiters: Vec<TailWaiter>,
}

struct TailWaiter {
    key: String,
    from: StreamId,
    limit: usize,
    deadline: Instant,
    reply: RpcReplyPort<Result<Vec<StoredEvent>, EventLogError>>,
}

// ============================================================================
// Messages
// ============================================================================

/// Messages handled by EventLogActor
#[derive(Debug)]
pub enum EventLogMsg {
    /// Atomically append one event; the assigned ID is strictly greater
    /// than every prior ID on the same key.
    Append {
        key: String,
        kind: EventKind,
        thread_id: String,
        data: serde_json::Value,
        reply: RpcReplyPort<Result<StreamId, EventLogError>>,
    },
    /// Events with IDs in `(from, to]`, append order, at most `limit`.
    Range {
        key: String,
        from: StreamId,
        to: Offset,
        limit: usize,
        reply: RpcReplyPort<Result<Vec<StoredEvent>, EventLogError>>,
    },
    /// Like Range with an unbounded upper end, but parks up to `block_ms`
    /// waiting for events strictly newer than `from`. Replies empty on
    /// timeout.
    Tail {
        key: String,
        from: StreamId,
        block_ms: u64,
        limit: usize,
        reply: RpcReplyPort<Result<Vec<StoredEvent>, EventLogError>>,
    },
    Length {
        key: String,
        reply: RpcReplyPort<Result<u64, EventLogError>>,
    },
    /// Stream keys matching a glob pattern (`*` wildcard only).
    Keys {
        pattern: String,
        reply: RpcReplyPort<Result<Vec<String>, EventLogError>>,
    },
    /// Drops a whole stream; returns the number of deleted events.
    Delete {
        key: String,
        reply: RpcReplyPort<Result<u64, EventLogError>>,
    },
    /// Internal: expire parked tail waiters past their deadline.
    Tick,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone)]
pub enum EventLogError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("event log unavailable: {0}")]
    Unavailable(String),
}

impl From<libsql::Error> for EventLogError {
    fn from(e: libsql::Error) -> Self {
        EventLogError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for EventLogError {
    fn from(e: serde_json::Error) -> Self {
        EventLogError::Serialization(e.to_string())
    }
}

// ============================================================================
// Actor
// ============================================================================

#[async_trait]
impl Actor for EventLogActor {
    type Msg = EventLogMsg;
    type State = EventLogState;
    type Arguments = EventLogArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let conn = match args {
            EventLogArguments::File(path) => match Self::open(&path).await {
                Ok(conn) => {
                    tracing::info!(database_path = %path, "Event log opened");
                    conn
                }
                Err(e) => {
                    // Stay live without durability rather than refusing to
                    // serve; restart forgets history written meanwhile.
                    tracing::warn!(
                        database_path = %path,
                        error = %e,
                        "Event log database unreachable, falling back to in-memory store"
                    );
                    Self::open(":memory:").await.map_err(|e| {
                        ActorProcessingErr::from(format!("Failed to open in-memory store: {e}"))
                    })?
                }
            },
            EventLogArguments::InMemory => Self::open(":memory:").await.map_err(|e| {
                ActorProcessingErr::from(format!("Failed to open in-memory store: {e}"))
            })?,
        };

        let tick_ref = myself.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(WAITER_TICK_MS));
            loop {
                ticker.tick().await;
                if tick_ref.cast(EventLogMsg::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(EventLogState {
            conn,
            last_ids: HashMap::new(),
            waiters: Vec::new(),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            EventLogMsg::Append {
                key,
                kind,
                thread_id,
                data,
                reply,
            } => {
                let result = self.handle_append(state, &key, kind, &thread_id, data).await;
                let _ = reply.send(result);
                self.wake_waiters(state, &key).await;
            }
            EventLogMsg::Range {
                key,
                from,
                to,
                limit,
                reply,
            } => {
                let result = Self::range_query(&state.conn, &key, from, to, limit).await;
                let _ = reply.send(result);
            }
            EventLogMsg::Tail {
                key,
                from,
                block_ms,
                limit,
                reply,
            } => {
                match Self::range_query(&state.conn, &key, from, Offset::End, limit).await {
                    Ok(events) if events.is_empty() && block_ms > 0 => {
                        state.waiters.push(TailWaiter {
                            key,
                            from,
                            limit,
                            deadline: Instant::now() + Duration::from_millis(block_ms),
                            reply,
                        });
                    }
                    result => {
                        let _ = reply.send(result);
                    }
                }
            }
            EventLogMsg::Length { key, reply } => {
                let _ = reply.send(Self::length_query(&state.conn, &key).await);
            }
            EventLogMsg::Keys { pattern, reply } => {
                let _ = reply.send(Self::keys_query(&state.conn, &pattern).await);
            }
            EventLogMsg::Delete { key, reply } => {
                let result = Self::delete_query(&state.conn, &key).await;
                state.last_ids.remove(&key);
                let _ = reply.send(result);
            }
            EventLogMsg::Tick => {
                let now = Instant::now();
                let parked = std::mem::take(&mut state.waiters);
                for waiter in parked {
                    if waiter.deadline <= now {
                        let _ = waiter.reply.send(Ok(Vec::new()));
                    } else {
                        state.waiters.push(waiter);
                    }
                }
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for waiter in state.waiters.drain(..) {
            let _ = waiter.reply.send(Ok(Vec::new()));
        }
        tracing::info!(actor_id = %myself.get_id(), "EventLogActor stopped");
        Ok(())
    }
}

// ============================================================================
// Queries
// ============================================================================

impl EventLogActor {
    async fn open(path: &str) -> Result<Connection, libsql::Error> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let db = libsql::Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        Self::run_migrations(&conn).await?;
        Ok(conn)
    }

    async fn run_migrations(conn: &Connection) -> Result<(), libsql::Error> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS stream_events (
                stream_key TEXT NOT NULL,
                id_ms INTEGER NOT NULL,
                id_seq INTEGER NOT NULL,
                kind TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                data_json TEXT NOT NULL,
                PRIMARY KEY (stream_key, id_ms, id_seq)
            )
            "#,
            (),
        )
        .await?;
        Ok(())
    }

    async fn handle_append(
        &self,
        state: &mut EventLogState,
        key: &str,
        kind: EventKind,
        thread_id: &str,
        data: serde_json::Value,
    ) -> Result<StreamId, EventLogError> {
        let last = match state.last_ids.get(key) {
            Some(id) => *id,
            None => Self::load_last_id(&state.conn, key).await?,
        };

        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let id = if now_ms > last.ms {
            StreamId::new(now_ms, 0)
        } else {
            last.next()
        };

        let data_json = serde_json::to_string(&data)?;
        state
            .conn
            .execute(
                r#"
                INSERT INTO stream_events (stream_key, id_ms, id_seq, kind, thread_id, data_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                libsql::params![
                    key.to_string(),
                    id.ms as i64,
                    id.seq as i64,
                    kind.as_str(),
                    thread_id.to_string(),
                    data_json
                ],
            )
            .await?;

        state.last_ids.insert(key.to_string(), id);
        Ok(id)
    }

    async fn load_last_id(conn: &Connection, key: &str) -> Result<StreamId, EventLogError> {
        let mut rows = conn
            .query(
                r#"
                SELECT id_ms, id_seq FROM stream_events
                WHERE stream_key = ?1
                ORDER BY id_ms DESC, id_seq DESC
                LIMIT 1
                "#,
                [key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(StreamId::new(
                row.get::<i64>(0)? as u64,
                row.get::<i64>(1)? as u64,
            )),
            None => Ok(StreamId::ZERO),
        }
    }

    async fn range_query(
        conn: &Connection,
        key: &str,
        from: StreamId,
        to: Offset,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, EventLogError> {
        let mut rows = match to {
            Offset::At(upper) => {
                conn.query(
                    r#"
                    SELECT id_ms, id_seq, kind, thread_id, data_json FROM stream_events
                    WHERE stream_key = ?1
                      AND (id_ms > ?2 OR (id_ms = ?2 AND id_seq > ?3))
                      AND (id_ms < ?4 OR (id_ms = ?4 AND id_seq <= ?5))
                    ORDER BY id_ms ASC, id_seq ASC
                    LIMIT ?6
                    "#,
                    libsql::params![
                        key.to_string(),
                        from.ms as i64,
                        from.seq as i64,
                        upper.ms as i64,
                        upper.seq as i64,
                        limit as i64
                    ],
                )
                .await?
            }
            // `Start` as an upper bound admits nothing; the zero-limit read
            // below handles it without a special query.
            Offset::Start => return Ok(Vec::new()),
            Offset::End => {
                conn.query(
                    r#"
                    SELECT id_ms, id_seq, kind, thread_id, data_json FROM stream_events
                    WHERE stream_key = ?1
                      AND (id_ms > ?2 OR (id_ms = ?2 AND id_seq > ?3))
                    ORDER BY id_ms ASC, id_seq ASC
                    LIMIT ?4
                    "#,
                    libsql::params![
                        key.to_string(),
                        from.ms as i64,
                        from.seq as i64,
                        limit as i64
                    ],
                )
                .await?
            }
        };

        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: EventKind = row
                .get::<String>(2)?
                .parse()
                .map_err(|e: crate::events::UnknownEventKind| {
                    EventLogError::Serialization(e.to_string())
                })?;
            events.push(StoredEvent {
                id: StreamId::new(row.get::<i64>(0)? as u64, row.get::<i64>(1)? as u64),
                kind,
                thread_id: row.get::<String>(3)?,
                data: serde_json::from_str(&row.get::<String>(4)?)?,
            });
        }
        Ok(events)
    }

    async fn length_query(conn: &Connection, key: &str) -> Result<u64, EventLogError> {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM stream_events WHERE stream_key = ?1",
                [key],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<i64>(0)? as u64),
            None => Ok(0),
        }
    }

    async fn keys_query(conn: &Connection, pattern: &str) -> Result<Vec<String>, EventLogError> {
        let like = pattern.replace('*', "%");
        let mut rows = conn
            .query(
                "SELECT DISTINCT stream_key FROM stream_events WHERE stream_key LIKE ?1 ORDER BY stream_key",
                [like.as_str()],
            )
            .await?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(row.get::<String>(0)?);
        }
        Ok(keys)
    }

    async fn delete_query(conn: &Connection, key: &str) -> Result<u64, EventLogError> {
        let deleted = conn
            .execute("DELETE FROM stream_events WHERE stream_key = ?1", [key])
            .await?;
        Ok(deleted)
    }

    /// Hand newly appended events to every parked tail on this key. Each
    /// waiter gets its own read from its own cursor (fan-out semantics).
    async fn wake_waiters(&self, state: &mut EventLogState, key: &str) {
        if state.waiters.is_empty() {
            return;
        }
        let parked = std::mem::take(&mut state.waiters);
        for waiter in parked {
            if waiter.key != key {
                state.waiters.push(waiter);
                continue;
            }
            match Self::range_query(&state.conn, &waiter.key, waiter.from, Offset::End, waiter.limit)
                .await
            {
                Ok(events) if events.is_empty() => state.waiters.push(waiter),
                result => {
                    let _ = waiter.reply.send(result);
                }
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn unavailable<T>(e: ractor::RactorErr<T>) -> EventLogError {
    EventLogError::Unavailable(e.to_string())
}

/// Append one event, returning its assigned ID.
pub async fn append(
    log: &ActorRef<EventLogMsg>,
    key: impl AsRef<str>,
    kind: EventKind,
    thread_id: impl AsRef<str>,
    data: serde_json::Value,
) -> Result<StreamId, EventLogError> {
    ractor::call!(log, |reply| EventLogMsg::Append {
        key: key.as_ref().to_string(),
        kind,
        thread_id: thread_id.as_ref().to_string(),
        data,
        reply,
    })
    .map_err(unavailable)?
}

/// Events with IDs in `(from, to]`, up to `limit`.
pub async fn range(
    log: &ActorRef<EventLogMsg>,
    key: impl AsRef<str>,
    from: StreamId,
    to: Offset,
    limit: usize,
) -> Result<Vec<StoredEvent>, EventLogError> {
    ractor::call!(log, |reply| EventLogMsg::Range {
        key: key.as_ref().to_string(),
        from,
        to,
        limit,
        reply,
    })
    .map_err(unavailable)?
}

/// Events strictly newer than `from`, blocking up to `block_ms`.
pub async fn tail(
    log: &ActorRef<EventLogMsg>,
    key: impl AsRef<str>,
    from: StreamId,
    block_ms: u64,
    limit: usize,
) -> Result<Vec<StoredEvent>, EventLogError> {
    ractor::call!(log, |reply| EventLogMsg::Tail {
        key: key.as_ref().to_string(),
        from,
        block_ms,
        limit,
        reply,
    })
    .map_err(unavailable)?
}

pub async fn keys(
    log: &ActorRef<EventLogMsg>,
    pattern: impl AsRef<str>,
) -> Result<Vec<String>, EventLogError> {
    ractor::call!(log, |reply| EventLogMsg::Keys {
        pattern: pattern.as_ref().to_string(),
        reply,
    })
    .map_err(unavailable)?
}

pub async fn delete(
    log: &ActorRef<EventLogMsg>,
    key: impl AsRef<str>,
) -> Result<u64, EventLogError> {
    ractor::call!(log, |reply| EventLogMsg::Delete {
        key: key.as_ref().to_string(),
        reply,
    })
    .map_err(unavailable)?
}

pub async fn length(
    log: &ActorRef<EventLogMsg>,
    key: impl AsRef<str>,
) -> Result<u64, EventLogError> {
    ractor::call!(log, |reply| EventLogMsg::Length {
        key: key.as_ref().to_string(),
        reply,
    })
    .map_err(unavailable)?
}

// ============================================================================
// Tests
// ============================================================================

//! Canonical event vocabulary shared by the event log, runner, and replayer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::stream_id::StreamId;

/// Wire event kinds. These are the SSE `event:` names, verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageChunk,
    ToolCalls,
    ToolCallChunks,
    ToolCallResult,
    Interrupt,
    ResearchStart,
    ResearchEnd,
    Error,
    ReplayEnd,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::MessageChunk => "message_chunk",
            EventKind::ToolCalls => "tool_calls",
            EventKind::ToolCallChunks => "tool_call_chunks",
            EventKind::ToolCallResult => "tool_call_result",
            EventKind::Interrupt => "interrupt",
            EventKind::ResearchStart => "research_start",
            EventKind::ResearchEnd => "research_end",
            EventKind::Error => "error",
            EventKind::ReplayEnd => "replay_end",
        }
    }

    /// Terminal events mark end-of-stream; the runner appends exactly one.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Error | EventKind::ReplayEnd)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message_chunk" => Ok(EventKind::MessageChunk),
            "tool_calls" => Ok(EventKind::ToolCalls),
            "tool_call_chunks" => Ok(EventKind::ToolCallChunks),
            "tool_call_result" => Ok(EventKind::ToolCallResult),
            "interrupt" => Ok(EventKind::Interrupt),
            "research_start" => Ok(EventKind::ResearchStart),
            "research_end" => Ok(EventKind::ResearchEnd),
            "error" => Ok(EventKind::Error),
            "replay_end" => Ok(EventKind::ReplayEnd),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("unknown event kind: {0:?}")]
pub struct UnknownEventKind(pub String);

/// One event as stored in (and read back from) the event log.
///
/// Immutable once written. `data` is the kind-specific payload; it always
/// carries `id`, `thread_id`, `query_id`, `agent`, and `role`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: StreamId,
    pub kind: EventKind,
    pub thread_id: String,
    pub data: serde_json::Value,
}

/// Addressing token for one task's event stream.
pub fn stream_key(thread_id: &str, task_id: &str) -> String {
    format!("chat:{thread_id}:{task_id}")
}

/// Splits a stream key back into its thread and task halves. The task half
/// may itself contain colons.
pub fn split_stream_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix("chat:")?;
    rest.split_once(':')
}

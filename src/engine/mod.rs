//! Workflow engine boundary.
//!
//! The agent workflow (LLM calls, search tools, planner/researcher/reporter
//! roles) lives behind [`WorkflowEngine`]. An engine invocation yields a
//! lazy sequence of [`EngineEvent`]s and may suspend on an interrupt, in
//! which case it blocks on the resume slot until feedback arrives.

pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::task::TaskConfig;

/// A whole tool invocation announced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// A partial fragment of a streamed tool-call argument.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolCallChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// One choice offered to the user by an interrupt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptOption {
    pub text: String,
    pub value: String,
}

/// Events produced by a workflow engine, as a tagged union of known kinds.
/// The runner's translation into canonical events is a total function over
/// this union; [`EngineEvent::Unknown`] is logged and dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A plain text token from an AI role.
    MessageChunk {
        agent: String,
        id: String,
        content: String,
        reasoning_content: Option<String>,
        finish_reason: Option<String>,
    },
    /// Whole tool calls announced by the model.
    ToolCalls {
        agent: String,
        id: String,
        tool_calls: Vec<ToolCall>,
        chunks: Vec<ToolCallChunk>,
    },
    /// Partial tool-call argument streaming.
    ToolCallChunks {
        agent: String,
        id: String,
        chunks: Vec<ToolCallChunk>,
    },
    /// A tool's return value.
    ToolCallResult {
        agent: String,
        id: String,
        tool_call_id: String,
        content: String,
    },
    /// The engine is suspended awaiting a user choice.
    Interrupt {
        id: String,
        content: String,
        options: Vec<InterruptOption>,
    },
    /// Research phase boundaries.
    PhaseStart { topic: String },
    PhaseEnd,
    /// The workflow raised; no further events follow.
    Failed { message: String },
    /// Forward-compatibility escape hatch for kinds this build predates.
    Unknown {
        kind: String,
        payload: serde_json::Value,
    },
}

/// Parameters for one engine invocation.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub task_id: String,
    pub thread_id: String,
    pub config: TaskConfig,
}

/// A started engine invocation: the event sequence plus the single-slot
/// resume channel the engine blocks on after emitting an interrupt.
pub struct EngineHandle {
    pub events: mpsc::Receiver<EngineEvent>,
    pub resume: mpsc::Sender<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine failed to start: {0}")]
    Start(String),
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync + 'static {
    async fn start(&self, run: WorkflowRun) -> Result<EngineHandle, EngineError>;
}

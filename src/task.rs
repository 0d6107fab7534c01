//! Task lifecycle types shared by the registry, manager, and API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle states.
///
/// ```text
/// pending ──▶ running ──▶ completed
///    │           ├──────▶ failed
///    └───────────┴──────▶ cancelled
/// ```
///
/// Terminal states are frozen; the registry rejects further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self → next` is an edge of the lifecycle graph. Same-state
    /// "transitions" are allowed so field-only updates can restate status.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Running)
                    | (Pending, Cancelled)
                    | (Running, Completed)
                    | (Running, Failed)
                    | (Running, Cancelled)
            )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = InvalidTaskStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(InvalidTaskStatus(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("invalid task status: {0:?}")]
pub struct InvalidTaskStatus(pub String);

/// One message in the conversation history. `content` is either a plain
/// string or a list of content parts (`{"type": "text", "text": ...}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Workflow parameters forwarded to the engine. Unknown request fields are
/// ignored at the serde layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub resources: Vec<serde_json::Value>,
    #[serde(default = "default_max_plan_iterations")]
    pub max_plan_iterations: u32,
    #[serde(default = "default_max_step_num")]
    pub max_step_num: u32,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: u32,
    #[serde(default = "default_true")]
    pub auto_accepted_plan: bool,
    #[serde(default)]
    pub interrupt_feedback: Option<String>,
    #[serde(default)]
    pub mcp_settings: serde_json::Value,
    #[serde(default = "default_true")]
    pub enable_background_investigation: bool,
    #[serde(default = "default_report_style")]
    pub report_style: String,
    #[serde(default)]
    pub enable_deep_thinking: bool,
}

fn default_max_plan_iterations() -> u32 {
    1
}
fn default_max_step_num() -> u32 {
    3
}
fn default_max_search_results() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_report_style() -> String {
    "academic".to_string()
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            resources: Vec::new(),
            max_plan_iterations: default_max_plan_iterations(),
            max_step_num: default_max_step_num(),
            max_search_results: default_max_search_results(),
            auto_accepted_plan: true,
            interrupt_feedback: None,
            mcp_settings: serde_json::Value::Null,
            enable_background_investigation: true,
            report_style: default_report_style(),
            enable_deep_thinking: false,
        }
    }
}

impl TaskConfig {
    /// The last user message's text content; also the research topic.
    pub fn user_input(&self) -> String {
        for message in self.messages.iter().rev() {
            if message.role != "user" {
                continue;
            }
            match &message.content {
                serde_json::Value::String(s) if !s.is_empty() => return s.clone(),
                serde_json::Value::Array(parts) => {
                    for part in parts {
                        if part.get("type").and_then(|t| t.as_str()) == Some("text") {
                            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                                return text.to_string();
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        String::new()
    }
}

/// The registry's record of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub thread_id: String,
    pub user_input: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub config: TaskConfig,
}

impl TaskInfo {
    pub fn new(
        task_id: impl Into<String>,
        thread_id: impl Into<String>,
        user_input: impl Into<String>,
        config: TaskConfig,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            thread_id: thread_id.into(),
            user_input: user_input.into(),
            status: TaskStatus::Pending,
            progress: 0.0,
            current_step: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifecycle_graph_edges() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Cancelled));

        // Restating the current status is not a transition.
        assert!(Running.can_transition_to(Running));
    }

    #[test]
    fn status_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!("running".parse::<TaskStatus>().unwrap(), TaskStatus::Running);
        assert!("paused".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn config_defaults_match_request_contract() {
        let config: TaskConfig = serde_json::from_value(json!({})).unwrap();
        assert!(config.messages.is_empty());
        assert_eq!(config.max_plan_iterations, 1);
        assert_eq!(config.max_step_num, 3);
        assert_eq!(config.max_search_results, 3);
        assert!(config.auto_accepted_plan);
        assert!(config.enable_background_investigation);
        assert!(!config.enable_deep_thinking);
        assert_eq!(config.report_style, "academic");
    }

    #[test]
    fn unknown_config_fields_are_ignored() {
        let config: TaskConfig = serde_json::from_value(json!({
            "messages": [],
            "podcast_voice": "none",
            "debug": true
        }))
        .unwrap();
        assert!(config.messages.is_empty());
    }

    #[test]
    fn user_input_takes_last_user_message() {
        let config: TaskConfig = serde_json::from_value(json!({
            "messages": [
                {"role": "user", "content": "first question"},
                {"role": "assistant", "content": "an answer"},
                {"role": "user", "content": "second question"}
            ]
        }))
        .unwrap();
        assert_eq!(config.user_input(), "second question");
    }

    #[test]
    fn user_input_extracts_text_parts() {
        let config: TaskConfig = serde_json::from_value(json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "image", "url": "x"},
                    {"type": "text", "text": "describe this"}
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(config.user_input(), "describe this");
    }

    #[test]
    fn user_input_empty_without_user_messages() {
        assert_eq!(TaskConfig::default().user_input(), "");
    }
}

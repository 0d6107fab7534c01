//! Scripted workflow engine.
//!
//! Replays a fixed event script, bracketing it with `PhaseStart`/`PhaseEnd`
//! around the research phase. When the task config does not auto-accept the
//! plan, an interrupt is emitted first and the script only proceeds once
//! feedback arrives on the resume slot. Backs the demo binary and the test
//! suites; the real engine lives behind the same trait.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    EngineError, EngineEvent, EngineHandle, InterruptOption, ToolCall, WorkflowEngine, WorkflowRun,
};

#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    steps: Vec<EngineEvent>,
    step_delay: Duration,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<EngineEvent>) -> Self {
        Self {
            steps,
            step_delay: Duration::ZERO,
        }
    }

    /// Pace the script; useful for exercising live tailing and cancellation.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// A small end-to-end research run: a search tool round trip followed
    /// by a streamed report.
    pub fn canned_research() -> Self {
        Self::new(vec![
            message("planner", "msg-plan", "Drafting a research plan."),
            EngineEvent::ToolCalls {
                agent: "researcher".to_string(),
                id: "msg-search".to_string(),
                tool_calls: vec![ToolCall {
                    id: "call-1".to_string(),
                    name: "web_search".to_string(),
                    args: serde_json::json!({"query": "background material"}),
                }],
                chunks: Vec::new(),
            },
            EngineEvent::ToolCallResult {
                agent: "researcher".to_string(),
                id: "msg-search-result".to_string(),
                tool_call_id: "call-1".to_string(),
                content: "3 sources found".to_string(),
            },
            message("reporter", "msg-report", "## Findings\n"),
            message("reporter", "msg-report", "The gathered sources agree on the key points."),
        ])
    }
}

/// Shorthand for a plain token event.
pub fn message(agent: &str, id: &str, content: &str) -> EngineEvent {
    EngineEvent::MessageChunk {
        agent: agent.to_string(),
        id: id.to_string(),
        content: content.to_string(),
        reasoning_content: None,
        finish_reason: None,
    }
}

fn plan_review_interrupt() -> EngineEvent {
    EngineEvent::Interrupt {
        id: "plan-review".to_string(),
        content: "Please review the proposed research plan.".to_string(),
        options: vec![
            InterruptOption {
                text: "Edit plan".to_string(),
                value: "edit_plan".to_string(),
            },
            InterruptOption {
                text: "Start research".to_string(),
                value: "accepted".to_string(),
            },
        ],
    }
}

#[async_trait]
impl WorkflowEngine for ScriptedEngine {
    async fn start(&self, run: WorkflowRun) -> Result<EngineHandle, EngineError> {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (resume_tx, mut resume_rx) = mpsc::channel::<String>(1);

        let mut steps = self.steps.clone();
        if !run.config.auto_accepted_plan && run.config.interrupt_feedback.is_none() {
            steps.insert(0, plan_review_interrupt());
        }
        let delay = self.step_delay;
        let topic = run.config.user_input();

        tokio::spawn(async move {
            if event_tx
                .send(EngineEvent::PhaseStart { topic })
                .await
                .is_err()
            {
                return;
            }
            for step in steps {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let is_interrupt = matches!(step, EngineEvent::Interrupt { .. });
                let is_failure = matches!(step, EngineEvent::Failed { .. });
                if event_tx.send(step).await.is_err() {
                    return;
                }
                if is_failure {
                    return;
                }
                if is_interrupt {
                    // Suspended: nothing more until feedback arrives.
                    if resume_rx.recv().await.is_none() {
                        return;
                    }
                }
            }
            let _ = event_tx.send(EngineEvent::PhaseEnd).await;
        });

        Ok(EngineHandle {
            events: event_rx,
            resume: resume_tx,
        })
    }
}

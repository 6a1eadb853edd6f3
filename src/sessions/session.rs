//! Session state as a fold over the event log.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::event_bus::{EventType, ExecutionEvent, TokenUsage};

/// Lifecycle of a workflow run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
    Cancelled,
}

impl SessionStatus {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

/// Derived view of one workflow run.
///
/// Every field except the identity triple (`id`, `workflow_name`,
/// `initial_input`) is computed by [`apply`](ExecutionSession::apply)ing
/// events in log order, so replaying a stored log always reconstructs the
/// same session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionSession {
    pub id: String,
    pub workflow_name: String,
    pub initial_input: String,
    pub status: SessionStatus,
    /// The node most recently started, while the run is in flight.
    pub current_node_id: Option<String>,
    /// Latest stored output per node id.
    pub node_outputs: FxHashMap<String, String>,
    /// User-visible streamed text, in arrival order.
    pub logs: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub final_output: Option<String>,
    pub usage: TokenUsage,
}

impl ExecutionSession {
    pub fn new(
        id: impl Into<String>,
        workflow_name: impl Into<String>,
        initial_input: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_name: workflow_name.into(),
            initial_input: initial_input.into(),
            status: SessionStatus::Running,
            current_node_id: None,
            node_outputs: FxHashMap::default(),
            logs: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            error: None,
            final_output: None,
            usage: TokenUsage::default(),
        }
    }

    /// Apply one event to the derived state.
    pub fn apply(&mut self, event: &ExecutionEvent) {
        match event.event_type {
            EventType::NodeStart => {
                self.current_node_id = event.node_id.clone();
            }
            EventType::NodeOutput => {
                // Only user-visible text lands in the session log.
                if event.data["chunk_kind"] == "text"
                    && let Some(chunk) = event.data["chunk"].as_str()
                {
                    self.logs.push(chunk.to_string());
                }
            }
            EventType::NodeComplete => {
                if let (Some(node_id), Some(output)) =
                    (&event.node_id, event.data["output"].as_str())
                {
                    self.node_outputs.insert(node_id.clone(), output.to_string());
                }
                if let Some(usage) = event.usage {
                    self.usage = self.usage.accumulate(usage);
                }
            }
            EventType::NodeError => {
                self.status = SessionStatus::Error;
                self.error = event.data["error"].as_str().map(str::to_string);
                self.end_time = Some(event.timestamp);
            }
            EventType::WorkflowComplete => {
                self.status = SessionStatus::Completed;
                self.final_output = event.data["final_output"].as_str().map(str::to_string);
                if let Some(usage) = event.usage {
                    self.usage = usage;
                }
                self.current_node_id = None;
                self.end_time = Some(event.timestamp);
            }
            EventType::WorkflowCancelled => {
                self.status = SessionStatus::Cancelled;
                self.current_node_id = None;
                self.end_time = Some(event.timestamp);
            }
        }
    }
}

/// Replay a log against a fresh session record.
pub fn fold_events(
    id: impl Into<String>,
    workflow_name: impl Into<String>,
    initial_input: impl Into<String>,
    events: &[ExecutionEvent],
) -> ExecutionSession {
    let mut session = ExecutionSession::new(id, workflow_name, initial_input);
    for event in events {
        session.apply(event);
    }
    session
}

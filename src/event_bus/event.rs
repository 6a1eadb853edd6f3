//! Execution event model.
//!
//! Events are the only mutation channel for a session: node outputs,
//! status, and the current node are all derived by folding the event log,
//! which is what makes a run exactly replayable after a disconnect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Discriminant for [`ExecutionEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeStart,
    NodeOutput,
    NodeComplete,
    NodeError,
    WorkflowComplete,
    WorkflowCancelled,
}

impl EventType {
    /// Returns `true` for events that terminate a session's log.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::WorkflowComplete | EventType::WorkflowCancelled)
            || matches!(self, EventType::NodeError)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventType::NodeStart => "node_start",
            EventType::NodeOutput => "node_output",
            EventType::NodeComplete => "node_complete",
            EventType::NodeError => "node_error",
            EventType::WorkflowComplete => "workflow_complete",
            EventType::WorkflowCancelled => "workflow_cancelled",
        };
        write!(f, "{label}")
    }
}

/// Token accounting reported by the agent runner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn accumulate(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
        }
    }
}

/// One entry in a session's append-only log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Kind-specific payload: chunk text, final output, result, error text.
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    /// Seconds elapsed for the node, present on completion events.
    #[serde(
        rename = "elapsed_time",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub elapsed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ExecutionEvent {
    pub fn new(event_type: EventType, node_id: Option<String>, data: Value) -> Self {
        Self {
            event_type,
            node_id,
            data,
            timestamp: Utc::now(),
            elapsed: None,
            usage: None,
        }
    }

    pub fn node_start(node_id: impl Into<String>, kind_label: &str) -> Self {
        Self::new(
            EventType::NodeStart,
            Some(node_id.into()),
            json!({ "kind": kind_label }),
        )
    }

    /// A streamed output chunk, classified as `thinking`, `tool`, or `text`.
    pub fn node_output(node_id: impl Into<String>, chunk: &str, chunk_kind: &str) -> Self {
        Self::new(
            EventType::NodeOutput,
            Some(node_id.into()),
            json!({ "chunk": chunk, "chunk_kind": chunk_kind }),
        )
    }

    pub fn node_complete(node_id: impl Into<String>, output: &str, elapsed: f64) -> Self {
        let mut event = Self::new(
            EventType::NodeComplete,
            Some(node_id.into()),
            json!({ "output": output }),
        );
        event.elapsed = Some(elapsed);
        event
    }

    pub fn node_error(node_id: impl Into<String>, error: &str) -> Self {
        Self::new(
            EventType::NodeError,
            Some(node_id.into()),
            json!({ "error": error }),
        )
    }

    pub fn workflow_complete(final_output: &str, usage: TokenUsage) -> Self {
        let mut event = Self::new(
            EventType::WorkflowComplete,
            None,
            json!({ "final_output": final_output }),
        );
        event.usage = Some(usage);
        event
    }

    pub fn workflow_cancelled() -> Self {
        Self::new(EventType::WorkflowCancelled, None, Value::Null)
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed: f64) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Convert to compact JSON for wire transports.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "[{id}] {}", self.event_type),
            None => write!(f, "{}", self.event_type),
        }
    }
}

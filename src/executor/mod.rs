//! Per-node-type execution state machines.
//!
//! Each node kind executes as a small state machine producing a stream of
//! [`ExecutionEvent`]s through its [`NodeContext`]:
//!
//! - **Input** binds its configured literal value and completes.
//! - **Worker** renders its task template, invokes the agent runner, and
//!   streams classified output chunks.
//! - **Condition** evaluates its parent's output against one of five
//!   evaluators, with an iteration cap that force-resolves to true.
//! - **Merge** combines all parents' outputs by strategy.
//!
//! The executor emits `node_start`, `node_output`, and `node_complete`
//! events itself; `node_error` is emitted by the driver when execution
//! returns an error, so the failure path has a single owner.

pub mod condition;
pub mod expr;
pub mod merge;
pub mod template;
pub mod worker;

pub use condition::ConditionOutcome;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::agent::{AgentError, AgentRunner};
use crate::event_bus::{ExecutionEvent, TokenUsage};
use crate::workflow::{Node, NodePayload};

/// Fatal execution failure for one node; aborts the whole run.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeExecutionError {
    #[error("template render failed for node {node_id}: {reason}")]
    #[diagnostic(
        code(loomflow::executor::template),
        help("Check {{input}}, {{parent}}, and {{node_<id>}} placeholders against the graph.")
    )]
    Template { node_id: String, reason: String },

    #[error("agent execution failed for node {node_id}")]
    #[diagnostic(code(loomflow::executor::agent))]
    Agent {
        node_id: String,
        #[source]
        source: AgentError,
    },

    #[error("condition evaluation failed for node {node_id}: {reason}")]
    #[diagnostic(code(loomflow::executor::condition))]
    Condition { node_id: String, reason: String },

    #[error("no outgoing edge labeled \"{branch}\" on condition node {node_id}")]
    #[diagnostic(
        code(loomflow::executor::missing_branch),
        help("Condition nodes need outgoing edges labeled true/false via sourceHandle.")
    )]
    MissingBranch { node_id: String, branch: String },

    #[error("merge node {node_id} has no parents")]
    #[diagnostic(code(loomflow::executor::merge_without_parents))]
    MergeWithoutParents { node_id: String },

    #[error("event channel closed while node {node_id} was executing")]
    #[diagnostic(code(loomflow::executor::event_channel_closed))]
    EventChannelClosed { node_id: String },
}

impl NodeExecutionError {
    /// Id of the node the failure is attributed to.
    #[must_use]
    pub fn node_id(&self) -> &str {
        match self {
            NodeExecutionError::Template { node_id, .. }
            | NodeExecutionError::Agent { node_id, .. }
            | NodeExecutionError::Condition { node_id, .. }
            | NodeExecutionError::MissingBranch { node_id, .. }
            | NodeExecutionError::MergeWithoutParents { node_id }
            | NodeExecutionError::EventChannelClosed { node_id } => node_id,
        }
    }
}

/// Everything one node invocation needs, snapshotted by the driver before
/// the node's task is spawned.
///
/// `outputs` is a read-only snapshot: parents are guaranteed complete
/// before this node's group starts, and the driver is the only writer.
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: String,
    /// The workflow's initial input, substituted for `{{input}}`.
    pub initial_input: String,
    /// Direct parent ids, in edge order.
    pub parents: Vec<String>,
    /// Snapshot of node outputs produced so far this run.
    pub outputs: FxHashMap<String, String>,
    /// Resumable handle from this node's previous execution, if any.
    pub resume_handle: Option<String>,
    /// 1-based visit counter for this node within the run.
    pub visit: u32,
    pub agent: Arc<dyn AgentRunner>,
    events: flume::Sender<ExecutionEvent>,
}

impl NodeContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        initial_input: impl Into<String>,
        parents: Vec<String>,
        outputs: FxHashMap<String, String>,
        resume_handle: Option<String>,
        visit: u32,
        agent: Arc<dyn AgentRunner>,
        events: flume::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            initial_input: initial_input.into(),
            parents,
            outputs,
            resume_handle,
            visit,
            agent,
            events,
        }
    }

    /// Emit an event into the run's fan-in queue.
    pub fn emit(&self, event: ExecutionEvent) -> Result<(), NodeExecutionError> {
        self.events
            .send(event)
            .map_err(|_| NodeExecutionError::EventChannelClosed {
                node_id: self.node_id.clone(),
            })
    }

    /// Output of the single parent, with the first-found fallback when the
    /// graph gives this node several parents.
    pub(crate) fn parent_output(&self) -> Option<&str> {
        if self.parents.len() > 1 {
            tracing::warn!(
                node_id = %self.node_id,
                parents = ?self.parents,
                "node has multiple parents; using the first with a stored output"
            );
        }
        self.parents
            .iter()
            .find_map(|p| self.outputs.get(p))
            .map(String::as_str)
    }
}

/// Result of one node invocation, consumed by the driver.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeOutcome {
    /// The node's stored output text.
    pub output: String,
    /// Opaque handle for resuming this node's agent context later.
    pub resume_handle: Option<String>,
    pub usage: TokenUsage,
    /// Present only for Condition nodes: the branch decision.
    pub condition: Option<ConditionOutcome>,
}

/// Execute one node to completion, emitting its event stream.
pub async fn execute_node(node: &Node, ctx: &NodeContext) -> Result<NodeOutcome, NodeExecutionError> {
    let started = Instant::now();
    ctx.emit(ExecutionEvent::node_start(
        &ctx.node_id,
        node.payload.kind_label(),
    ))?;

    match &node.payload {
        NodePayload::Input(data) => {
            // The configured literal wins; an empty literal falls back to
            // the run's initial input.
            let output = if data.initial_input.is_empty() {
                ctx.initial_input.clone()
            } else {
                data.initial_input.clone()
            };
            let elapsed = started.elapsed().as_secs_f64();
            ctx.emit(ExecutionEvent::node_complete(&ctx.node_id, &output, elapsed))?;
            Ok(NodeOutcome {
                output,
                ..Default::default()
            })
        }
        NodePayload::Worker(data) => worker::execute(data, ctx, started).await,
        NodePayload::Condition(data) => condition::execute(data, ctx, started).await,
        NodePayload::Merge(data) => merge::execute(data, ctx, started),
    }
}

//! Core workflow document model.
//!
//! A [`Workflow`] is the immutable description of a run: an ordered list of
//! [`Node`]s and the [`Edge`]s connecting them. Nodes carry a kind-specific
//! payload as an explicit tagged union ([`NodePayload`]) rather than a
//! free-form map, so executors can match on the variant instead of probing
//! fields.
//!
//! The serde shape mirrors the editor document format:
//!
//! ```json
//! {
//!   "name": "review-loop",
//!   "nodes": [
//!     {"id": "in", "type": "input", "data": {"initial_input": "hello"}},
//!     {"id": "w1", "type": "worker", "data": {"agent_name": "echo", "task_template": "Echo: {{input}}"}}
//!   ],
//!   "edges": [
//!     {"id": "e1", "source": "in", "target": "w1"}
//!   ]
//! }
//! ```
//!
//! Workflows are read-only during execution; the runner never mutates them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canvas coordinates carried through from the editor. Ignored by execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Payload for an Input node: the literal value seeding the workflow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputData {
    #[serde(default)]
    pub initial_input: String,
    /// Fan out this node's direct children as one concurrent group.
    #[serde(default)]
    pub parallel_execution: bool,
}

/// Payload for a Worker node: an agent task with a renderable template.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerData {
    pub agent_name: String,
    pub task_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Fan out this node's direct children as one concurrent group.
    #[serde(default)]
    pub parallel_execution: bool,
}

/// How a Condition node evaluates its input text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    /// Substring containment of `condition_value` in the input.
    Contains,
    /// Regular-expression match of `condition_value` against the input.
    Regex,
    /// Numeric comparison of the input length, e.g. `">= 10"`.
    Length,
    /// Sandboxed boolean expression over the input text.
    Expression,
    /// Delegate the judgment to the agent runner (boolean + rationale).
    Agent,
}

/// Payload for a Condition node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionData {
    pub condition_type: ConditionType,
    #[serde(default)]
    pub condition_value: String,
    /// Iteration cap that makes a feedback loop through this node legal.
    /// Visit `max_iterations + 1` force-resolves the condition to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

/// How a Merge node combines its parents' outputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Concatenate,
    First,
    Last,
    Custom,
}

/// Payload for a Merge node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeData {
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    /// Template with `{{branch_1}}`, `{{branch_2}}`, … placeholders for the
    /// `custom` strategy. Falls back to concatenate when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_template: Option<String>,
}

/// Kind-specific node payload, adjacently tagged as `type` + `data`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodePayload {
    Input(InputData),
    Worker(WorkerData),
    Condition(ConditionData),
    Merge(MergeData),
}

impl NodePayload {
    /// Stable label used in events and diagnostics.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            NodePayload::Input(_) => "input",
            NodePayload::Worker(_) => "worker",
            NodePayload::Condition(_) => "condition",
            NodePayload::Merge(_) => "merge",
        }
    }
}

/// One unit of work in the workflow graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub payload: NodePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Node {
    pub fn new(id: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            id: id.into(),
            payload,
            position: None,
        }
    }

    /// Returns `true` if this is an Input node.
    #[must_use]
    pub fn is_input(&self) -> bool {
        matches!(self.payload, NodePayload::Input(_))
    }

    /// Returns `true` if this is a Condition node carrying a finite
    /// iteration cap, the marker that legalizes a feedback loop.
    #[must_use]
    pub fn has_iteration_cap(&self) -> bool {
        matches!(
            &self.payload,
            NodePayload::Condition(ConditionData {
                max_iterations: Some(_),
                ..
            })
        )
    }

    /// Whether this node's direct children should execute as one
    /// concurrent group. Only Input and Worker payloads carry the flag.
    #[must_use]
    pub fn parallel_execution(&self) -> bool {
        match &self.payload {
            NodePayload::Input(d) => d.parallel_execution,
            NodePayload::Worker(d) => d.parallel_execution,
            NodePayload::Condition(_) | NodePayload::Merge(_) => false,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.payload.kind_label(), self.id)
    }
}

/// Branch label on a Condition node's outgoing edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchLabel {
    True,
    False,
}

impl BranchLabel {
    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        if value {
            BranchLabel::True
        } else {
            BranchLabel::False
        }
    }
}

impl fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchLabel::True => write!(f, "true"),
            BranchLabel::False => write!(f, "false"),
        }
    }
}

/// Directed connection between two nodes.
///
/// The editor document encodes the Condition branch label in `sourceHandle`;
/// `targetHandle` is accepted and ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(
        default,
        rename = "sourceHandle",
        skip_serializing_if = "Option::is_none"
    )]
    pub branch: Option<BranchLabel>,
    #[serde(
        default,
        rename = "targetHandle",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            branch: None,
            target_handle: None,
        }
    }

    #[must_use]
    pub fn with_branch(mut self, branch: BranchLabel) -> Self {
        self.branch = Some(branch);
        self
    }
}

/// An immutable workflow document: ordered nodes plus connecting edges.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            name: name.into(),
            nodes,
            edges,
        }
    }

    /// Parse a workflow document from its JSON form.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize the workflow document to compact JSON.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of the direct parents of `id`, in edge order.
    #[must_use]
    pub fn parent_ids(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source.as_str())
            .collect()
    }

    /// Ids of the direct children of `id`, in edge order.
    #[must_use]
    pub fn child_ids(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| e.target.as_str())
            .collect()
    }

    /// All Input node ids, in document order.
    #[must_use]
    pub fn input_ids(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.is_input())
            .map(|n| n.id.as_str())
            .collect()
    }
}

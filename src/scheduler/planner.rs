//! Folding the topological order into execution groups.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::CycleAnalysis;
use crate::graph::validator::ValidatedGraph;
use crate::workflow::Workflow;

/// A set of nodes scheduled to run together: one node (sequential) or
/// several (concurrent fan-out).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionGroup {
    pub node_ids: Vec<String>,
}

impl ExecutionGroup {
    pub fn singleton(id: impl Into<String>) -> Self {
        Self {
            node_ids: vec![id.into()],
        }
    }

    #[must_use]
    pub fn is_concurrent(&self) -> bool {
        self.node_ids.len() > 1
    }
}

/// Ordered list of execution groups plus a node → group index for the
/// runner's feedback-loop jump-back.
#[derive(Clone, Debug, Default)]
pub struct ExecutionPlan {
    pub groups: Vec<ExecutionGroup>,
    group_of: FxHashMap<String, usize>,
}

impl ExecutionPlan {
    /// Index of the group containing `node_id`, if the node is scheduled.
    #[must_use]
    pub fn group_index(&self, node_id: &str) -> Option<usize> {
        self.group_of.get(node_id).copied()
    }
}

/// Walk the sorted node list once, folding the direct children of each
/// `parallel_execution` node into a single concurrently-executed group.
///
/// The parallel node itself becomes a singleton group immediately before
/// its children's group. Every other node is a singleton group.
pub fn plan_groups(
    workflow: &Workflow,
    validated: &ValidatedGraph,
    cycles: &CycleAnalysis,
    order: &[String],
) -> ExecutionPlan {
    let mut children: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for edge in &validated.edges {
        if !cycles.is_back_edge(&edge.id) {
            children
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
    }

    let mut groups: Vec<ExecutionGroup> = Vec::new();
    let mut processed: FxHashSet<&str> = FxHashSet::default();

    for id in order {
        if processed.contains(id.as_str()) {
            continue;
        }
        processed.insert(id.as_str());

        let node = match workflow.node(id) {
            Some(node) => node,
            None => continue,
        };
        groups.push(ExecutionGroup::singleton(id.clone()));

        if node.parallel_execution() {
            let fan_out: Vec<String> = children
                .get(id.as_str())
                .into_iter()
                .flatten()
                .filter(|child| validated.reachable.contains(**child))
                .filter(|child| processed.insert(**child))
                .map(|child| child.to_string())
                .collect();
            if !fan_out.is_empty() {
                tracing::debug!(parent = %id, fan_out = ?fan_out, "planned concurrent group");
                groups.push(ExecutionGroup { node_ids: fan_out });
            }
        }
    }

    let mut group_of = FxHashMap::default();
    for (index, group) in groups.iter().enumerate() {
        for node_id in &group.node_ids {
            group_of.insert(node_id.clone(), index);
        }
    }
    ExecutionPlan { groups, group_of }
}

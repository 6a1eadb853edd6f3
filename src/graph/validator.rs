//! Tolerant structural validation of workflow documents.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

use crate::workflow::{Edge, Workflow};

use super::GraphValidationError;

/// Non-fatal findings collected during validation.
///
/// Warnings are also logged through `tracing`; they are returned so callers
/// (e.g. an HTTP layer) can surface them to the user.
#[derive(Clone, Debug, PartialEq)]
pub enum ValidationWarning {
    /// Edge referenced a node id that does not exist; the edge was dropped.
    DroppedEdge { edge_id: String, missing: String },
    /// Node id appeared more than once; only the first occurrence is kept.
    DuplicateNodeId { node_id: String },
    /// Node cannot be reached from any Input node and will not execute.
    UnreachableNode { node_id: String },
}

/// Result of structural validation: the surviving edge set plus warnings.
#[derive(Clone, Debug)]
pub struct ValidatedGraph {
    /// Edges whose endpoints both exist.
    pub edges: Vec<Edge>,
    /// Node ids reachable from at least one Input node.
    pub reachable: FxHashSet<String>,
    pub warnings: Vec<ValidationWarning>,
}

/// Validate a workflow's structure.
///
/// Fails only on a missing Input node. Edges referencing unknown nodes are
/// dropped with a warning, and nodes unreachable from every Input node are
/// flagged (they are excluded from scheduling, not treated as fatal).
pub fn validate(workflow: &Workflow) -> Result<ValidatedGraph, GraphValidationError> {
    let mut warnings = Vec::new();

    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            tracing::warn!(node_id = %node.id, "duplicate node id; keeping first occurrence");
            warnings.push(ValidationWarning::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }

    let input_ids = workflow.input_ids();
    if input_ids.is_empty() {
        return Err(GraphValidationError::MissingInputNode);
    }

    let mut edges = Vec::with_capacity(workflow.edges.len());
    for edge in &workflow.edges {
        let missing = [&edge.source, &edge.target]
            .into_iter()
            .find(|id| !seen.contains(id.as_str()));
        match missing {
            Some(missing) => {
                tracing::warn!(
                    edge_id = %edge.id,
                    missing = %missing,
                    "edge references unknown node; dropping edge"
                );
                warnings.push(ValidationWarning::DroppedEdge {
                    edge_id: edge.id.clone(),
                    missing: missing.clone(),
                });
            }
            None => edges.push(edge.clone()),
        }
    }

    let reachable = reachable_from_inputs(&input_ids, &edges);
    for node in &workflow.nodes {
        if !reachable.contains(node.id.as_str()) {
            tracing::warn!(node_id = %node.id, "node unreachable from any input; it will not execute");
            warnings.push(ValidationWarning::UnreachableNode {
                node_id: node.id.clone(),
            });
        }
    }

    Ok(ValidatedGraph {
        edges,
        reachable,
        warnings,
    })
}

/// BFS over the surviving edge set from every Input node.
fn reachable_from_inputs(input_ids: &[&str], edges: &[Edge]) -> FxHashSet<String> {
    let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for edge in edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut reachable: FxHashSet<String> = FxHashSet::default();
    let mut queue: VecDeque<&str> = VecDeque::new();
    for id in input_ids {
        if reachable.insert((*id).to_string()) {
            queue.push_back(id);
        }
    }
    while let Some(id) = queue.pop_front() {
        if let Some(children) = adjacency.get(id) {
            for child in children {
                if reachable.insert((*child).to_string()) {
                    queue.push_back(child);
                }
            }
        }
    }
    reachable
}

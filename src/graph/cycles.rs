//! Back-edge detection and cycle classification.
//!
//! A depth-first traversal from every Input node tracks the active
//! recursion stack. An edge whose target is already on the stack is a
//! back-edge; the cycle path is the stack slice from the target to the
//! source, inclusive. A back-edge is legitimate when that path contains a
//! Condition node carrying a finite `max_iterations`; the cap guarantees
//! the loop terminates at runtime. Any other cycle is refused before
//! execution starts.
//!
//! The legality rule is deliberately lenient: *any* capped Condition node
//! anywhere on the discovered path legalizes the back-edge, not only the
//! node that owns it.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::workflow::{Edge, Workflow};

use super::GraphValidationError;

/// Outcome of cycle classification over the validated edge set.
#[derive(Clone, Debug, Default)]
pub struct CycleAnalysis {
    /// Ids of edges identified as legitimate feedback back-edges. These are
    /// excluded from topological sorting and resolved at runtime by the
    /// Condition node's branch selection.
    pub back_edges: FxHashSet<String>,
}

impl CycleAnalysis {
    /// Returns `true` if the given edge is a recorded feedback back-edge.
    #[must_use]
    pub fn is_back_edge(&self, edge_id: &str) -> bool {
        self.back_edges.contains(edge_id)
    }
}

/// Classify every cycle reachable from the workflow's Input nodes.
///
/// # Errors
///
/// Returns [`GraphValidationError::UnboundedCycle`] for the first cycle
/// found whose path has no iteration-capped Condition node.
pub fn classify_cycles(
    workflow: &Workflow,
    edges: &[Edge],
) -> Result<CycleAnalysis, GraphValidationError> {
    let mut adjacency: FxHashMap<&str, Vec<&Edge>> = FxHashMap::default();
    for edge in edges {
        adjacency.entry(edge.source.as_str()).or_default().push(edge);
    }

    let mut analysis = CycleAnalysis::default();
    let mut visited: FxHashSet<&str> = FxHashSet::default();
    let mut stack: Vec<&str> = Vec::new();
    let mut on_stack: FxHashSet<&str> = FxHashSet::default();

    for input_id in workflow.input_ids() {
        if !visited.contains(input_id) {
            dfs(
                input_id,
                workflow,
                &adjacency,
                &mut visited,
                &mut stack,
                &mut on_stack,
                &mut analysis,
            )?;
        }
    }
    Ok(analysis)
}

fn dfs<'a>(
    node_id: &'a str,
    workflow: &Workflow,
    adjacency: &FxHashMap<&'a str, Vec<&'a Edge>>,
    visited: &mut FxHashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    on_stack: &mut FxHashSet<&'a str>,
    analysis: &mut CycleAnalysis,
) -> Result<(), GraphValidationError> {
    visited.insert(node_id);
    stack.push(node_id);
    on_stack.insert(node_id);

    if let Some(outgoing) = adjacency.get(node_id) {
        for edge in outgoing {
            let target = edge.target.as_str();
            if on_stack.contains(target) {
                // Cycle path: stack slice from the target to the source.
                let start = stack
                    .iter()
                    .position(|id| *id == target)
                    .unwrap_or_default();
                let path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                let bounded = path
                    .iter()
                    .filter_map(|id| workflow.node(id))
                    .any(|n| n.has_iteration_cap());
                if bounded {
                    tracing::debug!(
                        edge_id = %edge.id,
                        path = %path.join(" -> "),
                        "bounded feedback loop accepted"
                    );
                    analysis.back_edges.insert(edge.id.clone());
                } else {
                    return Err(GraphValidationError::UnboundedCycle { path });
                }
            } else if !visited.contains(target) {
                dfs(target, workflow, adjacency, visited, stack, on_stack, analysis)?;
            }
        }
    }

    stack.pop();
    on_stack.remove(node_id);
    Ok(())
}

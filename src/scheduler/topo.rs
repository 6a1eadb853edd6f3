//! Kahn-style topological ordering over the reachable, back-edge-free
//! subgraph.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

use crate::graph::CycleAnalysis;
use crate::graph::validator::ValidatedGraph;
use crate::workflow::Workflow;

use super::TopologicalSortError;

/// Compute a total order over the reachable nodes.
///
/// The in-degree table counts only non-back-edge parents, and the queue is
/// seeded with the Input nodes, so a node is dequeued only after every
/// non-back-edge parent has been visited. Iterations are bounded by
/// node-count² as a guard against a stuck queue; exceeding the bound is an
/// internal invariant violation, not a user-facing outcome.
pub fn topological_order(
    workflow: &Workflow,
    validated: &ValidatedGraph,
    cycles: &CycleAnalysis,
) -> Result<Vec<String>, TopologicalSortError> {
    let reachable = &validated.reachable;
    let forward_edges: Vec<_> = validated
        .edges
        .iter()
        .filter(|e| !cycles.is_back_edge(&e.id))
        .filter(|e| reachable.contains(&e.source) && reachable.contains(&e.target))
        .collect();

    let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
    let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for node in &workflow.nodes {
        if reachable.contains(node.id.as_str()) {
            in_degree.entry(node.id.as_str()).or_insert(0);
        }
    }
    for edge in &forward_edges {
        *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    // Seed with Input nodes first so execution starts from the sources,
    // then any other zero-degree nodes in document order.
    let mut queue: VecDeque<&str> = VecDeque::new();
    let mut queued: FxHashSet<&str> = FxHashSet::default();
    for id in workflow.input_ids() {
        if reachable.contains(id) && queued.insert(id) {
            queue.push_back(id);
        }
    }
    for node in &workflow.nodes {
        let id = node.id.as_str();
        if reachable.contains(id)
            && in_degree.get(id).copied().unwrap_or_default() == 0
            && queued.insert(id)
        {
            queue.push_back(id);
        }
    }

    let node_count = in_degree.len();
    let max_iterations = node_count.saturating_mul(node_count).max(1);
    let mut order: Vec<String> = Vec::with_capacity(node_count);
    let mut visited: FxHashSet<&str> = FxHashSet::default();
    let mut iterations = 0usize;

    while let Some(id) = queue.pop_front() {
        iterations += 1;
        if iterations > max_iterations {
            break;
        }
        if !visited.insert(id) {
            continue;
        }
        order.push(id.to_string());
        if let Some(children) = adjacency.get(id) {
            for &child in children {
                // Every reachable child was seeded into the table; a miss
                // means the graph bookkeeping is inconsistent.
                let Some(degree) = in_degree.get_mut(child) else {
                    tracing::error!(child, "node missing from the in-degree table");
                    return Err(TopologicalSortError {
                        stuck: vec![child.to_string()],
                    });
                };
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if order.len() != node_count {
        let stuck: Vec<String> = in_degree
            .keys()
            .filter(|id| !visited.contains(**id))
            .map(|id| id.to_string())
            .collect();
        tracing::error!(stuck = ?stuck, "topological sort did not visit every reachable node");
        return Err(TopologicalSortError { stuck });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{classify_cycles, validate};
    use crate::workflow::{
        ConditionData, ConditionType, Edge, InputData, Node, NodePayload, WorkerData,
    };

    fn input(id: &str) -> Node {
        Node::new(id, NodePayload::Input(InputData::default()))
    }

    fn worker(id: &str) -> Node {
        Node::new(
            id,
            NodePayload::Worker(WorkerData {
                agent_name: "a".into(),
                task_template: "t".into(),
                allowed_tools: None,
                parallel_execution: false,
            }),
        )
    }

    fn order_of(wf: &Workflow) -> Vec<String> {
        let validated = validate(wf).unwrap();
        let cycles = classify_cycles(wf, &validated.edges).unwrap();
        topological_order(wf, &validated, &cycles).unwrap()
    }

    #[test]
    fn diamond_orders_parents_before_children() {
        let wf = Workflow::new(
            "t",
            vec![input("in"), worker("a"), worker("b"), worker("join")],
            vec![
                Edge::new("e1", "in", "a"),
                Edge::new("e2", "in", "b"),
                Edge::new("e3", "a", "join"),
                Edge::new("e4", "b", "join"),
            ],
        );
        let order = order_of(&wf);
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos("in") < pos("a"));
        assert!(pos("in") < pos("b"));
        assert!(pos("a") < pos("join"));
        assert!(pos("b") < pos("join"));
    }

    #[test]
    /// Back-edges are excluded from the in-degree table, so a bounded
    /// feedback loop still yields a valid total order.
    fn feedback_loop_sorts_without_back_edge() {
        let wf = Workflow::new(
            "t",
            vec![
                input("in"),
                worker("w"),
                Node::new(
                    "c",
                    NodePayload::Condition(ConditionData {
                        condition_type: ConditionType::Contains,
                        condition_value: "ok".into(),
                        max_iterations: Some(2),
                    }),
                ),
            ],
            vec![
                Edge::new("e1", "in", "w"),
                Edge::new("e2", "w", "c"),
                Edge::new("e3", "c", "w"),
            ],
        );
        assert_eq!(order_of(&wf), vec!["in", "w", "c"]);
    }

    #[test]
    fn unreachable_nodes_are_not_ordered() {
        let wf = Workflow::new(
            "t",
            vec![input("in"), worker("w"), worker("island")],
            vec![Edge::new("e1", "in", "w")],
        );
        let order = order_of(&wf);
        assert!(!order.contains(&"island".to_string()));
    }
}

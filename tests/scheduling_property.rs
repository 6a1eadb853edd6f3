//! Property tests for topological ordering and group planning.

#[macro_use]
extern crate proptest;

use proptest::prelude::{Strategy, any, prop};
use rustc_hash::FxHashMap;

use loomflow::graph::{classify_cycles, validate};
use loomflow::scheduler::{plan_groups, topological_order};
use loomflow::workflow::{Edge, InputData, Node, NodePayload, WorkerData, Workflow};

/// Generate a random DAG: node count plus a subset of the forward edge
/// pairs (u, v) with u < v, which keeps the graph acyclic by construction.
fn dag_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2usize..8).prop_flat_map(|n| {
        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|u| ((u + 1)..n).map(move |v| (u, v)))
            .collect();
        prop::collection::vec(any::<bool>(), pairs.len()).prop_map(move |mask| {
            let edges = pairs
                .iter()
                .zip(mask)
                .filter(|(_, keep)| *keep)
                .map(|(pair, _)| *pair)
                .collect();
            (n, edges)
        })
    })
}

fn build_workflow(n: usize, edge_pairs: &[(usize, usize)]) -> Workflow {
    let mut nodes = vec![Node::new(
        "n0",
        NodePayload::Input(InputData {
            initial_input: "seed".into(),
            parallel_execution: false,
        }),
    )];
    for i in 1..n {
        nodes.push(Node::new(
            format!("n{i}"),
            NodePayload::Worker(WorkerData {
                agent_name: "a".into(),
                task_template: "t".into(),
                allowed_tools: None,
                parallel_execution: false,
            }),
        ));
    }
    let edges = edge_pairs
        .iter()
        .enumerate()
        .map(|(i, (u, v))| Edge::new(format!("e{i}"), format!("n{u}"), format!("n{v}")))
        .collect();
    Workflow::new("prop", nodes, edges)
}

proptest! {
    #[test]
    /// Every reachable node appears exactly once in the topological order,
    /// and every surviving edge points forward in it.
    fn prop_topological_order_respects_edges((n, edge_pairs) in dag_strategy()) {
        let wf = build_workflow(n, &edge_pairs);
        let validated = validate(&wf).unwrap();
        let cycles = classify_cycles(&wf, &validated.edges).unwrap();
        let order = topological_order(&wf, &validated, &cycles).unwrap();

        let position: FxHashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        prop_assert_eq!(position.len(), order.len(), "order contains duplicates");

        for id in &order {
            prop_assert!(validated.reachable.contains(id));
        }
        for id in &validated.reachable {
            prop_assert!(position.contains_key(id.as_str()));
        }
        for edge in &validated.edges {
            if let (Some(&u), Some(&v)) = (
                position.get(edge.source.as_str()),
                position.get(edge.target.as_str()),
            ) {
                prop_assert!(u < v, "edge {} not respected", edge.id);
            }
        }
    }

    #[test]
    /// Without parallel flags the plan is the order itself: one singleton
    /// group per node, covering each scheduled node exactly once.
    fn prop_plan_covers_order_exactly((n, edge_pairs) in dag_strategy()) {
        let wf = build_workflow(n, &edge_pairs);
        let validated = validate(&wf).unwrap();
        let cycles = classify_cycles(&wf, &validated.edges).unwrap();
        let order = topological_order(&wf, &validated, &cycles).unwrap();
        let plan = plan_groups(&wf, &validated, &cycles, &order);

        let flattened: Vec<String> = plan
            .groups
            .iter()
            .flat_map(|g| g.node_ids.iter().cloned())
            .collect();
        prop_assert_eq!(&flattened, &order);
        for id in &order {
            prop_assert!(plan.group_index(id).is_some());
        }
    }
}

//! Topological scheduling and parallel group planning.
//!
//! The scheduler turns a validated, cycle-classified workflow into an
//! [`ExecutionPlan`]: an ordered list of groups, each holding either a
//! single node (sequential) or several nodes that run concurrently
//! (fan-out from a node with `parallel_execution`).
//!
//! Feedback back-edges are excluded here; the runner re-enters earlier
//! groups at runtime when a Condition node selects a back-edge branch.

pub mod planner;
pub mod topo;

pub use planner::{ExecutionGroup, ExecutionPlan, plan_groups};
pub use topo::topological_order;

use miette::Diagnostic;
use thiserror::Error;

use crate::graph::CycleAnalysis;
use crate::graph::validator::ValidatedGraph;
use crate::workflow::Workflow;

/// Defensive invariant violation in the topological sort.
///
/// Never expected in normal operation: back-edges are removed before
/// sorting, so a stuck queue indicates an algorithmic bug. Surfaced
/// verbatim rather than masked.
#[derive(Debug, Error, Diagnostic)]
#[error("topological sort failed to make progress; stuck nodes: {}", stuck.join(", "))]
#[diagnostic(
    code(loomflow::scheduler::topological_sort),
    help("This indicates an internal scheduling bug; the graph passed cycle classification.")
)]
pub struct TopologicalSortError {
    /// Ids of reachable nodes that never became ready.
    pub stuck: Vec<String>,
}

/// Produce the full execution plan for a validated workflow.
///
/// Convenience wrapper: topological order over the non-back-edge subgraph,
/// then group planning over that order.
pub fn build_plan(
    workflow: &Workflow,
    validated: &ValidatedGraph,
    cycles: &CycleAnalysis,
) -> Result<ExecutionPlan, TopologicalSortError> {
    let order = topological_order(workflow, validated, cycles)?;
    Ok(plan_groups(workflow, validated, cycles, &order))
}

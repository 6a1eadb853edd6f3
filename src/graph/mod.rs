//! Structural validation and cycle classification for workflow graphs.
//!
//! Validation happens in two passes before anything executes:
//!
//! 1. [`validator`] checks that an Input node exists, drops edges that
//!    reference missing nodes, and flags nodes unreachable from any Input
//!    node. Dropped edges and unreachable nodes are warnings, never hard
//!    failures, so a partially broken graph can still run its connected
//!    portion.
//! 2. [`cycles`] runs a depth-first traversal to find back-edges and
//!    classifies each discovered cycle as a bounded feedback loop (a capped
//!    Condition node appears somewhere on the cycle path) or an illegal
//!    unbounded cycle, which refuses execution outright.

pub mod cycles;
pub mod validator;

pub use cycles::{CycleAnalysis, classify_cycles};
pub use validator::{ValidatedGraph, ValidationWarning, validate};

use miette::Diagnostic;
use thiserror::Error;

/// Fatal structural problems reported before any node executes.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphValidationError {
    /// No Input node exists, so there is nothing to seed execution with.
    #[error("workflow has no input node")]
    #[diagnostic(
        code(loomflow::graph::missing_input_node),
        help("Add a node of type \"input\" to provide the workflow's initial value.")
    )]
    MissingInputNode,

    /// A cycle with no iteration-capped Condition node on its path.
    #[error("unbounded cycle detected: {}", path.join(" -> "))]
    #[diagnostic(
        code(loomflow::graph::unbounded_cycle),
        help(
            "Every cycle must pass through a condition node with max_iterations set; \
             otherwise the loop can never terminate."
        )
    )]
    UnboundedCycle {
        /// Node ids along the cycle, from the back-edge target to its source.
        path: Vec<String>,
    },
}

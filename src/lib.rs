//! # Loomflow: Graph-driven Workflow Execution Engine
//!
//! Loomflow executes editor-authored workflow graphs: typed nodes wired by
//! directed edges, validated and scheduled up front, then driven
//! concurrently with a durable, replayable event log per run.
//!
//! ## Core Concepts
//!
//! - **Workflow**: The immutable graph document of nodes and edges
//! - **Validation**: Tolerant structural checks plus cycle classification
//!   that admits only iteration-capped feedback loops
//! - **Scheduler**: Topological ordering folded into sequential and
//!   concurrent execution groups
//! - **Executor**: Per-node-kind state machines streaming execution events
//! - **Runner**: The concurrent driver with cancellation and feedback
//!   loop re-entry
//! - **Sessions**: Append-only event logs with exactly-once tailing
//!
//! ## Quick Start
//!
//! ```no_run
//! use loomflow::runner::WorkflowRunner;
//! use loomflow::sessions::SessionStore;
//! use loomflow::workflow::Workflow;
//! use std::sync::Arc;
//!
//! # async fn example(agent: Arc<dyn loomflow::agent::AgentRunner>) -> miette::Result<()> {
//! let workflow = Workflow::from_json_str(
//!     r#"{
//!         "name": "echo",
//!         "nodes": [
//!             {"id": "in", "type": "input", "data": {"initial_input": "hello"}},
//!             {"id": "w", "type": "worker",
//!              "data": {"agent_name": "echo", "task_template": "Echo: {{input}}"}}
//!         ],
//!         "edges": [{"id": "e1", "source": "in", "target": "w"}]
//!     }"#,
//! )
//! .into_diagnostic()?;
//!
//! let runner = WorkflowRunner::new(agent, SessionStore::new());
//! let outcome = runner.run(&workflow, "hello").await?;
//! println!("{:?}", outcome.final_output);
//! # Ok(())
//! # }
//! # use miette::IntoDiagnostic;
//! ```
//!
//! ## Module Guide
//!
//! - [`workflow`] - The workflow document model and its JSON form
//! - [`graph`] - Structural validation and cycle classification
//! - [`scheduler`] - Topological sort and execution group planning
//! - [`executor`] - Per-node-type execution state machines
//! - [`agent`] - The external agent runner seam
//! - [`runner`] - The concurrent driver and cancellation
//! - [`sessions`] - Durable session logs and live tailing
//! - [`event_bus`] - Event broadcasting to pluggable sinks
//! - [`telemetry`] - Tracing bootstrap

pub mod agent;
pub mod event_bus;
pub mod executor;
pub mod graph;
pub mod runner;
pub mod scheduler;
pub mod sessions;
pub mod telemetry;
pub mod workflow;

//! Workflow execution driver.
//!
//! [`WorkflowRunner`] ties the whole pipeline together: validate the
//! graph, classify its cycles, build the execution plan, then walk the
//! plan's groups, spawning one task per group member and multiplexing
//! their event streams into the session log and the event bus.
//!
//! Runs are cancellable from outside through a [`CancelHandle`]; the
//! driver checks the token between groups and while waiting on a group,
//! so a cancelled run ends with a `workflow_cancelled` event rather than
//! mid-append.

mod driver;

pub use driver::{RunOutcome, WorkflowRunner};

use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::watch;

use crate::executor::NodeExecutionError;
use crate::graph::GraphValidationError;
use crate::scheduler::TopologicalSortError;
use crate::sessions::SessionNotFoundError;

/// Anything that can end a run before the workflow completes.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduling(#[from] TopologicalSortError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Node(#[from] NodeExecutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionNotFoundError),
}

/// Runner tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct RunnerConfig {
    /// Forward every stored event to the event bus for live sinks.
    pub forward_to_bus: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            forward_to_bus: true,
        }
    }
}

/// Requests cancellation of one run. Cheap to clone into other tasks.
#[derive(Clone)]
pub struct CancelHandle {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Signal the run to stop. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving side of a cancellation request, observed by the driver.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. Never resolves if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancellation handle and token for one run.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle {
            tx: std::sync::Arc::new(tx),
        },
        CancelToken { rx },
    )
}

//! Agent runner collaborator interface.
//!
//! The engine never knows how an agent produces output; it talks to an
//! external runtime through this narrow seam. A run yields a stream of
//! chunk updates followed by exactly one final update carrying the
//! user-visible text, an opaque resumable handle, and token usage.
//!
//! The resumable handle enables context continuity: when the same node id
//! executes again (a later run, or a feedback-loop revisit), the previous
//! handle is passed back so the runtime can continue the prior context.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::event_bus::TokenUsage;

/// One item in an agent run's output stream.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentUpdate {
    /// An intermediate output chunk.
    Chunk { text: String },
    /// The terminal update. Always the last item of a successful run.
    Final {
        text: String,
        resume_handle: Option<String>,
        usage: TokenUsage,
    },
}

/// Receiving side of an agent run's output stream.
pub struct AgentStream {
    receiver: flume::Receiver<AgentUpdate>,
}

impl AgentStream {
    pub fn new(receiver: flume::Receiver<AgentUpdate>) -> Self {
        Self { receiver }
    }

    /// Await the next update; `None` once the producer side is finished.
    pub async fn next(&mut self) -> Option<AgentUpdate> {
        self.receiver.recv_async().await.ok()
    }
}

/// Failure reported by the external agent runtime.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    /// Timeout, process crash, or protocol error during execution.
    #[error("agent execution failed: {reason}")]
    #[diagnostic(
        code(loomflow::agent::execution),
        help("Check the agent runtime's logs; the workflow run is aborted.")
    )]
    Execution { reason: String },
}

impl AgentError {
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

/// External collaborator that performs one unit of agent work.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Start a run for the rendered task text.
    ///
    /// `resume_handle` is the opaque token returned by a previous run for
    /// the same node, if any. The returned stream yields zero or more
    /// [`AgentUpdate::Chunk`] items followed by one [`AgentUpdate::Final`].
    async fn run(
        &self,
        task_text: &str,
        resume_handle: Option<&str>,
    ) -> Result<AgentStream, AgentError>;
}

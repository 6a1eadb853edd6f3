//! Durable, replayable session records.
//!
//! A session is the append-only event log of one workflow run plus the
//! state derived from it. Events are the only mutation channel: status,
//! current node, and node outputs are all a left fold over the log
//! ([`fold_events`]), so loading a session and replaying its log
//! always reproduce the same state.
//!
//! The [`SessionStore`] serializes appends per session and lets any number
//! of tailing readers follow a running session to completion with
//! exactly-once delivery regardless of when they attach.

mod session;
mod store;

pub use session::{ExecutionSession, SessionStatus, fold_events};
pub use store::{EventTail, SessionStore};

use miette::Diagnostic;
use thiserror::Error;

/// Lookup failure in the session store.
#[derive(Debug, Error, Diagnostic)]
#[error("session not found: {session_id}")]
#[diagnostic(
    code(loomflow::sessions::not_found),
    help("The session id is unknown to this store; it may belong to another process.")
)]
pub struct SessionNotFoundError {
    pub session_id: String,
}

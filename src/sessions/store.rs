//! In-memory session store with replayable tails.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::event_bus::ExecutionEvent;

use super::{ExecutionSession, SessionNotFoundError};

struct SessionState {
    session: ExecutionSession,
    events: Vec<ExecutionEvent>,
    /// Set once a terminal event lands; no further appends are accepted.
    closed: bool,
}

struct SessionEntry {
    state: Mutex<SessionState>,
    notify: Notify,
}

/// Append-only store of session event logs.
///
/// Each session keeps its full log plus the folded [`ExecutionSession`]
/// snapshot. Appends are serialized per session, and [`tail`] readers are
/// woken through a [`Notify`] so a consumer attaching before, during, or
/// after the run observes the same event sequence exactly once.
///
/// [`tail`]: SessionStore::tail
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<FxHashMap<String, Arc<SessionEntry>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session and return its generated id.
    pub fn create(&self, workflow_name: &str, initial_input: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = Arc::new(SessionEntry {
            state: Mutex::new(SessionState {
                session: ExecutionSession::new(&id, workflow_name, initial_input),
                events: Vec::new(),
                closed: false,
            }),
            notify: Notify::new(),
        });
        self.sessions.lock().insert(id.clone(), entry);
        tracing::debug!(session_id = %id, workflow_name, "session created");
        id
    }

    fn entry(&self, session_id: &str) -> Result<Arc<SessionEntry>, SessionNotFoundError> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionNotFoundError {
                session_id: session_id.to_string(),
            })
    }

    /// Append one event to a session's log, folding it into the snapshot
    /// and waking any tailing readers. Returns the new log length.
    pub fn append(
        &self,
        session_id: &str,
        event: ExecutionEvent,
    ) -> Result<usize, SessionNotFoundError> {
        let entry = self.entry(session_id)?;
        let len = {
            let mut state = entry.state.lock();
            if state.closed {
                tracing::warn!(
                    session_id,
                    event = %event,
                    "event appended after a terminal event; dropping"
                );
                return Ok(state.events.len());
            }
            if event.event_type.is_terminal() {
                state.closed = true;
            }
            state.session.apply(&event);
            state.events.push(event);
            state.events.len()
        };
        entry.notify.notify_waiters();
        Ok(len)
    }

    /// Current folded snapshot of a session.
    pub fn session(&self, session_id: &str) -> Result<ExecutionSession, SessionNotFoundError> {
        Ok(self.entry(session_id)?.state.lock().session.clone())
    }

    /// Full event log of a session, as stored so far.
    pub fn events(&self, session_id: &str) -> Result<Vec<ExecutionEvent>, SessionNotFoundError> {
        Ok(self.entry(session_id)?.state.lock().events.clone())
    }

    /// Follow a session's log starting at `from_index`.
    ///
    /// Events already stored are replayed immediately; the tail then waits
    /// for live appends and ends after the terminal event.
    pub fn tail(
        &self,
        session_id: &str,
        from_index: usize,
    ) -> Result<EventTail, SessionNotFoundError> {
        Ok(EventTail {
            entry: self.entry(session_id)?,
            cursor: from_index,
        })
    }
}

/// Cursor over one session's event log.
pub struct EventTail {
    entry: Arc<SessionEntry>,
    cursor: usize,
}

impl EventTail {
    /// Next event at the cursor, waiting for the writer if the log has not
    /// caught up yet. Returns `None` once the log is closed and drained.
    pub async fn next(&mut self) -> Option<ExecutionEvent> {
        loop {
            let notified = self.entry.notify.notified();
            tokio::pin!(notified);
            // Arm the waiter before checking the log. `notify_waiters` only
            // reaches already-registered waiters, so without this an append
            // landing between the check and the await would be lost.
            notified.as_mut().enable();
            {
                let state = self.entry.state.lock();
                if self.cursor < state.events.len() {
                    let event = state.events[self.cursor].clone();
                    self.cursor += 1;
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Index of the next event this tail will yield.
    #[must_use]
    pub fn position(&self) -> usize {
        self.cursor
    }
}

use std::io::{self, Result as IoResult, Stdout, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::event::ExecutionEvent;

/// Abstraction over an output target that consumes full event objects.
pub trait EventSink: Sync + Send {
    /// Handle a structured event. The sink decides how to serialize it.
    fn handle(&mut self, event: &ExecutionEvent) -> IoResult<()>;
}

/// Stdout sink emitting one line per event.
pub struct StdOutSink {
    handle: Stdout,
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self {
            handle: io::stdout(),
        }
    }
}

impl EventSink for StdOutSink {
    fn handle(&mut self, event: &ExecutionEvent) -> IoResult<()> {
        writeln!(self.handle, "{event}")?;
        self.handle.flush()
    }
}

/// In-memory sink for testing and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of all captured events.
    pub fn snapshot(&self) -> Vec<ExecutionEvent> {
        self.entries.lock().unwrap().clone()
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &ExecutionEvent) -> IoResult<()> {
        self.entries.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Channel-based sink for streaming to async consumers (e.g. SSE bridges).
///
/// Events are forwarded to a tokio mpsc channel without blocking.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &ExecutionEvent) -> IoResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }
}

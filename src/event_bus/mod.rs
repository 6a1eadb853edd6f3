//! Event model, bus, and sinks.
//!
//! The runner emits [`ExecutionEvent`]s; the [`EventBus`] broadcasts them to
//! pluggable [`EventSink`]s (stdout, in-memory capture, async channels) so a
//! caller can watch a run live while the session store persists the same
//! sequence for replay.

mod bus;
mod event;
mod sink;

pub use bus::EventBus;
pub use event::{EventType, ExecutionEvent, TokenUsage};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};

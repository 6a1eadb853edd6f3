use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

use super::event::ExecutionEvent;
use super::sink::{EventSink, StdOutSink};

/// State shared between the bus handle and its forwarder task.
struct Shared {
    sinks: Mutex<Vec<Box<dyn EventSink>>>,
    /// Terminal events dispatched so far: node_error, workflow_complete,
    /// workflow_cancelled.
    terminals: AtomicU64,
    terminal_seen: Notify,
}

impl Shared {
    fn dispatch(&self, event: &ExecutionEvent) {
        {
            let mut sinks = self.sinks.lock();
            for sink in sinks.iter_mut() {
                if let Err(error) = sink.handle(event) {
                    tracing::warn!(%error, "event sink rejected an event");
                }
            }
        }
        if event.event_type.is_terminal() {
            self.terminals.fetch_add(1, Ordering::SeqCst);
            self.terminal_seen.notify_waiters();
        }
    }
}

struct Forwarder {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Broadcasts execution events to registered sinks and counts workflow
/// terminations, so a caller can wait for a known number of runs to end
/// without polling its sinks.
///
/// Producers hold cloned flume senders; a background forwarder task drains
/// the channel into every sink. The forwarder starts on [`start`](Self::start)
/// and drains remaining queued events before exiting on
/// [`shutdown`](Self::shutdown).
pub struct EventBus {
    shared: Arc<Shared>,
    tx: flume::Sender<ExecutionEvent>,
    rx: flume::Receiver<ExecutionEvent>,
    forwarder: Mutex<Option<Forwarder>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            shared: Arc::new(Shared {
                sinks: Mutex::new(sinks),
                terminals: AtomicU64::new(0),
                terminal_seen: Notify::new(),
            }),
            tx,
            rx,
            forwarder: Mutex::new(None),
        }
    }

    /// Register another sink. Takes effect for events not yet dispatched.
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.shared.sinks.lock().push(Box::new(sink));
    }

    /// Clone of the producer side of the event channel.
    pub fn sender(&self) -> flume::Sender<ExecutionEvent> {
        self.tx.clone()
    }

    /// Spawn the forwarder task. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        let mut guard = self.forwarder.lock();
        if guard.is_some() {
            return;
        }
        let shared = self.shared.clone();
        let rx = self.rx.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    received = rx.recv_async() => match received {
                        Ok(event) => shared.dispatch(&event),
                        Err(_) => return,
                    },
                }
            }
            // Shutdown raced with producers: dispatch whatever they had
            // already queued before exiting.
            while let Ok(event) = rx.try_recv() {
                shared.dispatch(&event);
            }
        });
        *guard = Some(Forwarder {
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stop the forwarder, waiting for it to drain queued events.
    pub async fn shutdown(&self) {
        let forwarder = self.forwarder.lock().take();
        if let Some(forwarder) = forwarder {
            let _ = forwarder.shutdown.send(());
            let _ = forwarder.handle.await;
        }
    }

    /// Number of terminal events dispatched so far.
    pub fn terminal_count(&self) -> u64 {
        self.shared.terminals.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` terminal events have been dispatched.
    pub async fn wait_for_terminals(&self, count: u64) {
        loop {
            let notified = self.shared.terminal_seen.notified();
            tokio::pin!(notified);
            // Arm the waiter before the counter check so a dispatch racing
            // with it cannot be missed.
            notified.as_mut().enable();
            if self.shared.terminals.load(Ordering::SeqCst) >= count {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        // Signal shutdown but let the forwarder finish its drain on its own.
        if let Some(forwarder) = self.forwarder.lock().take() {
            let _ = forwarder.shutdown.send(());
        }
    }
}

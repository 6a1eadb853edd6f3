//! End-to-end runs over parsed workflow documents.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use loomflow::agent::{AgentError, AgentRunner, AgentStream, AgentUpdate};
use loomflow::event_bus::{EventBus, EventType, MemorySink, TokenUsage};
use loomflow::runner::WorkflowRunner;
use loomflow::sessions::{SessionStatus, SessionStore};
use loomflow::workflow::Workflow;

/// Agent whose final text is the rendered task itself, with a fresh
/// resume handle per run.
struct EchoAgent {
    /// Handles received per invocation, in call order.
    received: Mutex<Vec<Option<String>>>,
    counter: Mutex<u32>,
}

impl EchoAgent {
    fn new() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            counter: Mutex::new(0),
        }
    }
}

#[async_trait]
impl AgentRunner for EchoAgent {
    async fn run(
        &self,
        task_text: &str,
        resume_handle: Option<&str>,
    ) -> Result<AgentStream, AgentError> {
        self.received
            .lock()
            .push(resume_handle.map(str::to_string));
        let n = {
            let mut counter = self.counter.lock();
            *counter += 1;
            *counter
        };
        let (tx, rx) = flume::unbounded();
        tx.send(AgentUpdate::Chunk {
            text: task_text.to_string(),
        })
        .map_err(|_| AgentError::execution("stream closed"))?;
        tx.send(AgentUpdate::Final {
            text: task_text.to_string(),
            resume_handle: Some(format!("h{n}")),
            usage: TokenUsage {
                input_tokens: 2,
                output_tokens: 4,
            },
        })
        .map_err(|_| AgentError::execution("stream closed"))?;
        Ok(AgentStream::new(rx))
    }
}

const ECHO_DOC: &str = r#"{
    "name": "echo-review",
    "nodes": [
        {"id": "in", "type": "input", "data": {"initial_input": "hello"}},
        {"id": "w", "type": "worker",
         "data": {"agent_name": "echo", "task_template": "Echo: {{input}}"}},
        {"id": "c", "type": "condition",
         "data": {"condition_type": "contains", "condition_value": "Echo", "max_iterations": 2}},
        {"id": "m", "type": "merge", "data": {"merge_strategy": "first"}}
    ],
    "edges": [
        {"id": "e1", "source": "in", "target": "w"},
        {"id": "e2", "source": "w", "target": "c"},
        {"id": "e3", "source": "c", "target": "m", "sourceHandle": "true"},
        {"id": "e4", "source": "c", "target": "w", "sourceHandle": "false"}
    ]
}"#;

#[tokio::test]
/// The canonical echo document: the worker satisfies the condition on the
/// first pass, so the feedback edge is never taken and the first-strategy
/// merge yields "Echo: hello".
async fn echo_document_runs_to_completion() {
    let wf = Workflow::from_json_str(ECHO_DOC).unwrap();
    let runner = WorkflowRunner::new(Arc::new(EchoAgent::new()), SessionStore::new());
    let outcome = runner.run(&wf, "hello").await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.final_output.as_deref(), Some("Echo: hello"));
    assert_eq!(outcome.usage.output_tokens, 4);

    let session = runner.store().session(&outcome.session_id).unwrap();
    assert_eq!(session.workflow_name, "echo-review");
    assert_eq!(session.node_outputs["m"], "Echo: hello");
    // The worker ran exactly once.
    let events = runner.store().events(&outcome.session_id).unwrap();
    let worker_starts = events
        .iter()
        .filter(|e| e.event_type == EventType::NodeStart && e.node_id.as_deref() == Some("w"))
        .count();
    assert_eq!(worker_starts, 1);
}

#[tokio::test]
/// Revisits of the same worker carry the resume handle returned by its
/// previous invocation, so the agent runtime can continue its context.
async fn feedback_revisits_resume_prior_context() {
    let doc = ECHO_DOC.replace("\"Echo\"", "\"never-present\"");
    let wf = Workflow::from_json_str(&doc).unwrap();
    let agent = Arc::new(EchoAgent::new());
    let runner = WorkflowRunner::new(agent.clone(), SessionStore::new());
    let outcome = runner.run(&wf, "hello").await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed);

    // Three worker invocations: initial plus two loop re-entries.
    let received = agent.received.lock().clone();
    assert_eq!(
        received,
        vec![None, Some("h1".to_string()), Some("h2".to_string())]
    );
}

#[tokio::test]
/// A tail attached after the run replays exactly the stored log, and a
/// tail attached at an offset yields exactly the suffix.
async fn tail_replay_matches_stored_log() {
    let wf = Workflow::from_json_str(ECHO_DOC).unwrap();
    let runner = WorkflowRunner::new(Arc::new(EchoAgent::new()), SessionStore::new());
    let outcome = runner.run(&wf, "hello").await.unwrap();
    let events = runner.store().events(&outcome.session_id).unwrap();
    assert_eq!(
        events.last().map(|e| e.event_type),
        Some(EventType::WorkflowComplete)
    );

    let mut tail = runner.store().tail(&outcome.session_id, 0).unwrap();
    let mut replayed = Vec::new();
    while let Some(event) = tail.next().await {
        replayed.push(event);
    }
    assert_eq!(replayed, events);

    let mut suffix_tail = runner.store().tail(&outcome.session_id, 3).unwrap();
    let mut suffix = Vec::new();
    while let Some(event) = suffix_tail.next().await {
        suffix.push(event);
    }
    assert_eq!(suffix, events[3..]);
}

#[tokio::test]
/// With a bus attached, every stored event is also broadcast to sinks.
async fn runner_forwards_events_to_the_bus() {
    let sink = MemorySink::new();
    let bus = EventBus::with_sink(sink.clone());
    bus.start();

    let wf = Workflow::from_json_str(ECHO_DOC).unwrap();
    let runner =
        WorkflowRunner::new(Arc::new(EchoAgent::new()), SessionStore::new()).with_bus(&bus);
    let outcome = runner.run(&wf, "hello").await.unwrap();
    bus.wait_for_terminals(1).await;
    bus.shutdown().await;

    let stored = runner.store().events(&outcome.session_id).unwrap();
    let broadcast = sink.snapshot();
    assert_eq!(broadcast.len(), stored.len());
    assert_eq!(broadcast, stored);
}

#[tokio::test]
/// Resume handles outlive a run: a second run over the same document on
/// the same runner picks up where the worker's context left off.
async fn resume_handles_survive_across_runs() {
    let wf = Workflow::from_json_str(ECHO_DOC).unwrap();
    let agent = Arc::new(EchoAgent::new());
    let runner = WorkflowRunner::new(agent.clone(), SessionStore::new());

    let first = runner.run(&wf, "hello").await.unwrap();
    assert_eq!(first.status, SessionStatus::Completed);
    let second = runner.run(&wf, "hello").await.unwrap();
    assert_eq!(second.status, SessionStatus::Completed);

    // One worker invocation per run; the second continues the handle the
    // first one returned.
    let received = agent.received.lock().clone();
    assert_eq!(received, vec![None, Some("h1".to_string())]);
}

#[tokio::test]
/// The session fold reconstructs node outputs and usage from the log
/// alone, matching the live snapshot.
async fn replaying_the_log_reproduces_the_session() {
    let wf = Workflow::from_json_str(ECHO_DOC).unwrap();
    let runner = WorkflowRunner::new(Arc::new(EchoAgent::new()), SessionStore::new());
    let outcome = runner.run(&wf, "hello").await.unwrap();

    let live = runner.store().session(&outcome.session_id).unwrap();
    let events = runner.store().events(&outcome.session_id).unwrap();
    let replayed = loomflow::sessions::fold_events(
        &live.id,
        &live.workflow_name,
        &live.initial_input,
        &events,
    );

    assert_eq!(replayed.status, live.status);
    assert_eq!(replayed.node_outputs, live.node_outputs);
    assert_eq!(replayed.final_output, live.final_output);
    assert_eq!(replayed.usage, live.usage);
    assert_eq!(replayed.logs, live.logs);
}

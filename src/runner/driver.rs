//! The concurrent group driver.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::agent::AgentRunner;
use crate::event_bus::{EventBus, ExecutionEvent, TokenUsage};
use crate::executor::{ConditionOutcome, NodeContext, NodeExecutionError, NodeOutcome, execute_node};
use crate::graph::validator::ValidatedGraph;
use crate::graph::{CycleAnalysis, classify_cycles, validate};
use crate::scheduler::{ExecutionPlan, build_plan};
use crate::sessions::{SessionStatus, SessionStore};
use crate::workflow::{BranchLabel, Workflow};

use super::{CancelToken, RunnerConfig, RunnerError, cancel_pair};

/// Result of one workflow run.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    /// Output of the last node executed, absent for cancelled runs.
    pub final_output: Option<String>,
    pub usage: TokenUsage,
}

/// Executes workflows against a session store and an agent runner.
///
/// Per-run state (outputs, visit counters) lives on the stack of
/// [`run_cancellable`](WorkflowRunner::run_cancellable), so one runner
/// can drive many runs concurrently. Resumable handles are the
/// exception: they are keyed by node id on the runner itself, so a
/// later run touching the same node continues its prior agent context.
#[derive(Clone)]
pub struct WorkflowRunner {
    agent: Arc<dyn AgentRunner>,
    store: SessionStore,
    bus_sender: Option<flume::Sender<ExecutionEvent>>,
    /// Resume handles by node id, shared across runs. Read before each
    /// node spawn, written when its outcome is folded.
    resume_handles: Arc<Mutex<FxHashMap<String, String>>>,
    config: RunnerConfig,
}

impl WorkflowRunner {
    pub fn new(agent: Arc<dyn AgentRunner>, store: SessionStore) -> Self {
        Self {
            agent,
            store,
            bus_sender: None,
            resume_handles: Arc::new(Mutex::new(FxHashMap::default())),
            config: RunnerConfig::default(),
        }
    }

    /// Forward stored events to `bus` for live sinks.
    #[must_use]
    pub fn with_bus(mut self, bus: &EventBus) -> Self {
        self.bus_sender = Some(bus.sender());
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Run a workflow to completion without external cancellation.
    pub async fn run(
        &self,
        workflow: &Workflow,
        initial_input: &str,
    ) -> Result<RunOutcome, RunnerError> {
        let (_handle, token) = cancel_pair();
        self.run_cancellable(workflow, initial_input, token).await
    }

    /// Run a workflow, stopping early if `cancel` fires.
    ///
    /// Cancellation is observed between groups and while a group is in
    /// flight; in-flight node tasks are aborted and the session ends with
    /// a `workflow_cancelled` event.
    #[instrument(skip_all, fields(workflow = %workflow.name))]
    pub async fn run_cancellable(
        &self,
        workflow: &Workflow,
        initial_input: &str,
        mut cancel: CancelToken,
    ) -> Result<RunOutcome, RunnerError> {
        let validated = validate(workflow)?;
        let cycles = classify_cycles(workflow, &validated.edges)?;
        let plan = build_plan(workflow, &validated, &cycles)?;
        let session_id = self.store.create(&workflow.name, initial_input);
        tracing::info!(
            session_id = %session_id,
            groups = plan.groups.len(),
            back_edges = cycles.back_edges.len(),
            "starting workflow run"
        );

        let mut node_outputs: FxHashMap<String, String> = FxHashMap::default();
        let mut visits: FxHashMap<String, u32> = FxHashMap::default();
        let mut usage_total = TokenUsage::default();
        let mut last_completed: Option<String> = None;

        let mut cursor = 0;
        while cursor < plan.groups.len() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(session_id, usage_total);
            }
            let group = &plan.groups[cursor];

            // One task per group member; events fan in through a shared
            // queue and are appended in arrival order.
            let (event_tx, event_rx) = flume::unbounded::<ExecutionEvent>();
            let (result_tx, result_rx) =
                flume::unbounded::<(String, Result<NodeOutcome, NodeExecutionError>)>();
            let mut handles = Vec::with_capacity(group.node_ids.len());
            for node_id in &group.node_ids {
                let Some(node) = workflow.node(node_id) else {
                    continue;
                };
                let visit = visits
                    .entry(node_id.clone())
                    .and_modify(|v| *v += 1)
                    .or_insert(1);
                let resume_handle = self.resume_handles.lock().get(node_id).cloned();
                let ctx = NodeContext::new(
                    node_id.clone(),
                    initial_input,
                    parents_of(&validated, node_id),
                    node_outputs.clone(),
                    resume_handle,
                    *visit,
                    self.agent.clone(),
                    event_tx.clone(),
                );
                let node = node.clone();
                let result_tx = result_tx.clone();
                handles.push(tokio::spawn(async move {
                    let result = execute_node(&node, &ctx).await;
                    let _ = result_tx.send((node.id, result));
                }));
            }
            drop(result_tx);

            let mut pending = handles.len();
            let mut outcomes: Vec<(String, NodeOutcome)> = Vec::new();
            let mut failure: Option<NodeExecutionError> = None;
            let mut cancelled = false;
            while pending > 0 {
                tokio::select! {
                    event = event_rx.recv_async() => {
                        if let Ok(event) = event {
                            self.record(&session_id, event)?;
                        }
                    }
                    result = result_rx.recv_async() => {
                        let Ok((node_id, result)) = result else { break };
                        pending -= 1;
                        match result {
                            Ok(outcome) => outcomes.push((node_id, outcome)),
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                }
            }
            // Abort stragglers, then await every task so no node work
            // outlives the group (or the session, on cancellation).
            for handle in &handles {
                handle.abort();
            }
            for handle in handles {
                if let Err(error) = handle.await
                    && !error.is_cancelled()
                {
                    tracing::warn!(%error, "node task panicked");
                }
            }
            // Flush events already queued so the log keeps arrival order.
            while let Ok(event) = event_rx.try_recv() {
                self.record(&session_id, event)?;
            }

            if cancelled {
                return self.finish_cancelled(session_id, usage_total);
            }
            if let Some(err) = failure {
                self.record(
                    &session_id,
                    ExecutionEvent::node_error(err.node_id(), &err.to_string()),
                )?;
                tracing::error!(session_id = %session_id, error = %err, "workflow run failed");
                return Err(err.into());
            }

            let mut jump_to = None;
            for (node_id, outcome) in outcomes {
                node_outputs.insert(node_id.clone(), outcome.output.clone());
                if let Some(handle) = outcome.resume_handle {
                    self.resume_handles.lock().insert(node_id.clone(), handle);
                }
                usage_total = usage_total.accumulate(outcome.usage);
                if let Some(decision) = outcome.condition {
                    match resolve_branch(&validated, &cycles, &plan, &node_id, &decision) {
                        Ok(jump) => jump_to = jump,
                        Err(err) => {
                            self.record(
                                &session_id,
                                ExecutionEvent::node_error(err.node_id(), &err.to_string()),
                            )?;
                            return Err(err.into());
                        }
                    }
                }
            }
            last_completed = group.node_ids.last().cloned();

            match jump_to {
                Some(target_group) => cursor = target_group,
                None => cursor += 1,
            }
        }

        let final_output = last_completed.and_then(|id| node_outputs.get(&id).cloned());
        self.record(
            &session_id,
            ExecutionEvent::workflow_complete(
                final_output.as_deref().unwrap_or_default(),
                usage_total,
            ),
        )?;
        tracing::info!(session_id = %session_id, "workflow run completed");
        Ok(RunOutcome {
            session_id,
            status: SessionStatus::Completed,
            final_output,
            usage: usage_total,
        })
    }

    fn finish_cancelled(
        &self,
        session_id: String,
        usage: TokenUsage,
    ) -> Result<RunOutcome, RunnerError> {
        self.record(&session_id, ExecutionEvent::workflow_cancelled())?;
        tracing::info!(session_id = %session_id, "workflow run cancelled");
        Ok(RunOutcome {
            session_id,
            status: SessionStatus::Cancelled,
            final_output: None,
            usage,
        })
    }

    fn record(&self, session_id: &str, event: ExecutionEvent) -> Result<(), RunnerError> {
        if self.config.forward_to_bus
            && let Some(sender) = &self.bus_sender
        {
            let _ = sender.send(event.clone());
        }
        self.store.append(session_id, event)?;
        Ok(())
    }
}

fn parents_of(validated: &ValidatedGraph, node_id: &str) -> Vec<String> {
    validated
        .edges
        .iter()
        .filter(|e| e.target == node_id)
        .map(|e| e.source.clone())
        .collect()
}

/// Apply a Condition node's decision to the group cursor.
///
/// Selecting a feedback back-edge re-enters the group containing its
/// target; a forward selection continues the static plan. A forced
/// resolution never re-enters the loop, whatever branch it selected.
fn resolve_branch(
    validated: &ValidatedGraph,
    cycles: &CycleAnalysis,
    plan: &ExecutionPlan,
    node_id: &str,
    decision: &ConditionOutcome,
) -> Result<Option<usize>, NodeExecutionError> {
    let label = BranchLabel::from_bool(decision.result);
    let outgoing: Vec<_> = validated
        .edges
        .iter()
        .filter(|e| e.source == node_id)
        .collect();
    if outgoing.is_empty() {
        // Terminal condition: nothing to select.
        return Ok(None);
    }

    let selected: Vec<_> = outgoing
        .iter()
        .filter(|e| e.branch == Some(label))
        .collect();
    if selected.is_empty() {
        return Err(NodeExecutionError::MissingBranch {
            node_id: node_id.to_string(),
            branch: label.to_string(),
        });
    }

    let jump = selected
        .iter()
        .filter(|e| cycles.is_back_edge(&e.id))
        .filter_map(|e| plan.group_index(&e.target))
        .min();
    if jump.is_some() && decision.forced {
        tracing::warn!(
            node_id,
            "forced condition selected a feedback edge; continuing forward"
        );
        return Ok(None);
    }
    if let Some(group) = jump {
        tracing::debug!(
            node_id,
            result = decision.result,
            group,
            "feedback branch selected; re-entering earlier group"
        );
    }
    Ok(jump)
}

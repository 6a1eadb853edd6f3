//! Worker node execution: template render, agent invocation, chunk
//! streaming.

use std::time::Instant;

use crate::agent::AgentUpdate;
use crate::event_bus::{ExecutionEvent, TokenUsage};
use crate::workflow::WorkerData;

use super::{NodeContext, NodeExecutionError, NodeOutcome, template};

/// Lightweight content-shape classification of a streamed chunk.
///
/// `thinking` covers reasoning fragments, `tool` covers tool-protocol
/// payloads, everything else is user-visible `text`. Only `text` chunks
/// contribute to the fallback output when the runtime omits a final text.
pub(crate) fn classify_chunk(chunk: &str) -> &'static str {
    let trimmed = chunk.trim_start();
    if trimmed.starts_with("<thinking>") || trimmed.starts_with("Thinking:") {
        return "thinking";
    }
    if trimmed.starts_with('{')
        && (trimmed.contains("\"tool_use\"")
            || trimmed.contains("\"tool_name\"")
            || trimmed.contains("\"tool_result\""))
    {
        return "tool";
    }
    "text"
}

pub(crate) async fn execute(
    data: &WorkerData,
    ctx: &NodeContext,
    started: Instant,
) -> Result<NodeOutcome, NodeExecutionError> {
    let task = template::render(&data.task_template, ctx)?;
    tracing::debug!(
        node_id = %ctx.node_id,
        agent = %data.agent_name,
        resuming = ctx.resume_handle.is_some(),
        "invoking agent runner"
    );

    let mut stream = ctx
        .agent
        .run(&task, ctx.resume_handle.as_deref())
        .await
        .map_err(|source| NodeExecutionError::Agent {
            node_id: ctx.node_id.clone(),
            source,
        })?;

    let mut text_chunks: Vec<String> = Vec::new();
    let mut final_text: Option<String> = None;
    let mut resume_handle = None;
    let mut usage = TokenUsage::default();

    while let Some(update) = stream.next().await {
        match update {
            AgentUpdate::Chunk { text } => {
                let kind = classify_chunk(&text);
                ctx.emit(ExecutionEvent::node_output(&ctx.node_id, &text, kind))?;
                if kind == "text" {
                    text_chunks.push(text);
                }
            }
            AgentUpdate::Final {
                text,
                resume_handle: handle,
                usage: run_usage,
            } => {
                final_text = Some(text);
                resume_handle = handle;
                usage = run_usage;
            }
        }
    }

    let Some(final_text) = final_text else {
        // The stream ended without a final update: the runtime died
        // mid-run. Treat it like any other agent failure.
        return Err(NodeExecutionError::Agent {
            node_id: ctx.node_id.clone(),
            source: crate::agent::AgentError::execution(
                "agent stream ended without a final update",
            ),
        });
    };

    // Prefer the runtime's final text; fall back to the accumulated
    // user-visible chunks when it is empty.
    let output = if final_text.is_empty() {
        text_chunks.join("")
    } else {
        final_text
    };

    let elapsed = started.elapsed().as_secs_f64();
    ctx.emit(
        ExecutionEvent::node_complete(&ctx.node_id, &output, elapsed).with_usage(usage),
    )?;
    Ok(NodeOutcome {
        output,
        resume_handle,
        usage,
        condition: None,
    })
}

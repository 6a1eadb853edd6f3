//! Condition node evaluation.

use regex::Regex;
use serde_json::json;
use std::time::Instant;

use crate::agent::AgentUpdate;
use crate::event_bus::ExecutionEvent;
use crate::workflow::{ConditionData, ConditionType};

use super::{NodeContext, NodeExecutionError, NodeOutcome, expr};

/// The branch decision produced by a Condition node.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionOutcome {
    pub result: bool,
    pub rationale: String,
    /// True when the iteration cap overrode the evaluation.
    pub forced: bool,
}

/// Execute a Condition node: read the parent's output, evaluate, and apply
/// the loop-breaking iteration cap.
pub(crate) async fn execute(
    data: &ConditionData,
    ctx: &NodeContext,
    started: Instant,
) -> Result<NodeOutcome, NodeExecutionError> {
    let input = ctx.parent_output().unwrap_or_default().to_string();

    let outcome = if let Some(max) = data.max_iterations
        && ctx.visit > max
    {
        tracing::info!(
            node_id = %ctx.node_id,
            visit = ctx.visit,
            max_iterations = max,
            "iteration cap reached; forcing condition to true"
        );
        ConditionOutcome {
            result: true,
            rationale: format!("max_iterations ({max}) reached on visit {}; forcing true", ctx.visit),
            forced: true,
        }
    } else {
        evaluate(data, &input, ctx).await?
    };

    let elapsed = started.elapsed().as_secs_f64();
    let mut event = ExecutionEvent::node_complete(&ctx.node_id, &input, elapsed);
    event.data = json!({
        "output": input,
        "result": outcome.result,
        "rationale": outcome.rationale,
        "forced": outcome.forced,
        "visit": ctx.visit,
    });
    ctx.emit(event)?;

    // A condition passes its input through as its stored output.
    Ok(NodeOutcome {
        output: input,
        condition: Some(outcome),
        ..Default::default()
    })
}

async fn evaluate(
    data: &ConditionData,
    input: &str,
    ctx: &NodeContext,
) -> Result<ConditionOutcome, NodeExecutionError> {
    let value = data.condition_value.as_str();
    let plain = |result: bool, rationale: String| ConditionOutcome {
        result,
        rationale,
        forced: false,
    };

    match data.condition_type {
        ConditionType::Contains => {
            let result = input.contains(value);
            Ok(plain(
                result,
                format!("input {} \"{value}\"", if result { "contains" } else { "does not contain" }),
            ))
        }
        ConditionType::Regex => {
            let re = Regex::new(value).map_err(|e| NodeExecutionError::Condition {
                node_id: ctx.node_id.clone(),
                reason: format!("invalid regex \"{value}\": {e}"),
            })?;
            let result = re.is_match(input);
            Ok(plain(
                result,
                format!("regex \"{value}\" {}", if result { "matched" } else { "did not match" }),
            ))
        }
        ConditionType::Length => {
            let (op, threshold) = parse_length_spec(value).map_err(|reason| {
                NodeExecutionError::Condition {
                    node_id: ctx.node_id.clone(),
                    reason,
                }
            })?;
            let len = input.chars().count();
            let result = match op {
                ">" => len > threshold,
                ">=" => len >= threshold,
                "<" => len < threshold,
                "<=" => len <= threshold,
                _ => len == threshold,
            };
            Ok(plain(
                result,
                format!("length {len} {op} {threshold} is {result}"),
            ))
        }
        ConditionType::Expression => {
            let result = expr::evaluate(value, input).map_err(|reason| {
                NodeExecutionError::Condition {
                    node_id: ctx.node_id.clone(),
                    reason,
                }
            })?;
            Ok(plain(result, format!("expression \"{value}\" evaluated to {result}")))
        }
        ConditionType::Agent => judge_with_agent(value, input, ctx).await,
    }
}

/// Parse a length check like `">= 10"` into an operator and threshold.
fn parse_length_spec(value: &str) -> Result<(&'static str, usize), String> {
    let trimmed = value.trim();
    for op in [">=", "<=", "==", ">", "<"] {
        if let Some(rest) = trimmed.strip_prefix(op) {
            let threshold = rest
                .trim()
                .parse()
                .map_err(|_| format!("invalid length threshold in \"{value}\""))?;
            return Ok((op, threshold));
        }
    }
    Err(format!(
        "length condition needs an operator (>, >=, <, <=, ==): \"{value}\""
    ))
}

/// Delegate the judgment to the agent runner and parse a boolean verdict
/// out of its final text. The full reply becomes the rationale.
async fn judge_with_agent(
    criterion: &str,
    input: &str,
    ctx: &NodeContext,
) -> Result<ConditionOutcome, NodeExecutionError> {
    let task = format!(
        "Judge whether the following condition holds for the given text.\n\
         Condition: {criterion}\n\
         Text:\n{input}\n\
         Reply with \"true\" or \"false\" on the first line, then a short rationale."
    );
    let mut stream =
        ctx.agent
            .run(&task, None)
            .await
            .map_err(|source| NodeExecutionError::Agent {
                node_id: ctx.node_id.clone(),
                source,
            })?;

    let mut final_text = String::new();
    while let Some(update) = stream.next().await {
        if let AgentUpdate::Final { text, .. } = update {
            final_text = text;
        }
    }

    let verdict = final_text
        .split_whitespace()
        .next()
        .map(|word| word.trim_matches(|c: char| !c.is_ascii_alphabetic()))
        .map(str::to_ascii_lowercase);
    let result = match verdict.as_deref() {
        Some("true") | Some("yes") => true,
        Some("false") | Some("no") => false,
        _ => {
            // Fall back to scanning the reply for a verdict word.
            let lowered = final_text.to_ascii_lowercase();
            lowered.contains("true") && !lowered.contains("false")
        }
    };
    Ok(ConditionOutcome {
        result,
        rationale: final_text,
        forced: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, AgentRunner, AgentStream};
    use crate::event_bus::TokenUsage;
    use async_trait::async_trait;
    use rustc_hash::FxHashMap;
    use std::sync::Arc;

    struct VerdictAgent(&'static str);

    #[async_trait]
    impl AgentRunner for VerdictAgent {
        async fn run(
            &self,
            _task_text: &str,
            _resume_handle: Option<&str>,
        ) -> Result<AgentStream, AgentError> {
            let (tx, rx) = flume::unbounded();
            tx.send(AgentUpdate::Final {
                text: self.0.to_string(),
                resume_handle: None,
                usage: TokenUsage::default(),
            })
            .unwrap();
            Ok(AgentStream::new(rx))
        }
    }

    fn ctx_with(
        parent_output: &str,
        visit: u32,
        agent: Arc<dyn AgentRunner>,
    ) -> (NodeContext, flume::Receiver<crate::event_bus::ExecutionEvent>) {
        let (tx, rx) = flume::unbounded();
        let mut outputs = FxHashMap::default();
        outputs.insert("p".to_string(), parent_output.to_string());
        let ctx = NodeContext::new(
            "c",
            "init",
            vec!["p".to_string()],
            outputs,
            None,
            visit,
            agent,
            tx,
        );
        (ctx, rx)
    }

    fn contains_data(value: &str, cap: Option<u32>) -> ConditionData {
        ConditionData {
            condition_type: ConditionType::Contains,
            condition_value: value.into(),
            max_iterations: cap,
        }
    }

    #[tokio::test]
    async fn contains_passes_input_through_as_output() {
        let (ctx, _events) = ctx_with("Echo: hello", 1, Arc::new(VerdictAgent("unused")));
        let data = contains_data("Echo", None);
        let outcome = execute(&data, &ctx, Instant::now()).await.unwrap();
        assert_eq!(outcome.output, "Echo: hello");
        let cond = outcome.condition.unwrap();
        assert!(cond.result);
        assert!(!cond.forced);
    }

    #[tokio::test]
    /// With `max_iterations = 2`, visits 1 and 2 evaluate normally and
    /// visit 3 is force-resolved true with the override recorded.
    async fn iteration_cap_forces_true_on_visit_n_plus_one() {
        let agent: Arc<dyn AgentRunner> = Arc::new(VerdictAgent("unused"));
        let data = contains_data("never-present", Some(2));

        for visit in [1, 2] {
            let (ctx, _events) = ctx_with("text", visit, agent.clone());
            let cond = execute(&data, &ctx, Instant::now())
                .await
                .unwrap()
                .condition
                .unwrap();
            assert!(!cond.result, "visit {visit} should evaluate false");
            assert!(!cond.forced);
        }

        let (ctx, _events) = ctx_with("text", 3, agent);
        let cond = execute(&data, &ctx, Instant::now())
            .await
            .unwrap()
            .condition
            .unwrap();
        assert!(cond.result);
        assert!(cond.forced);
        assert!(cond.rationale.contains("max_iterations"));
    }

    #[tokio::test]
    async fn invalid_regex_is_a_condition_error() {
        let (ctx, _events) = ctx_with("text", 1, Arc::new(VerdictAgent("unused")));
        let data = ConditionData {
            condition_type: ConditionType::Regex,
            condition_value: "([".into(),
            max_iterations: None,
        };
        assert!(matches!(
            execute(&data, &ctx, Instant::now()).await,
            Err(NodeExecutionError::Condition { .. })
        ));
    }

    #[tokio::test]
    async fn length_spec_comparisons() {
        let (ctx, _events) = ctx_with("hello", 1, Arc::new(VerdictAgent("unused")));
        let data = ConditionData {
            condition_type: ConditionType::Length,
            condition_value: ">= 5".into(),
            max_iterations: None,
        };
        let cond = execute(&data, &ctx, Instant::now())
            .await
            .unwrap()
            .condition
            .unwrap();
        assert!(cond.result);
    }

    #[tokio::test]
    async fn agent_judgment_parses_leading_verdict() {
        let (ctx, _events) = ctx_with(
            "some text",
            1,
            Arc::new(VerdictAgent("true. The text satisfies the condition")),
        );
        let data = ConditionData {
            condition_type: ConditionType::Agent,
            condition_value: "is readable".into(),
            max_iterations: None,
        };
        let cond = execute(&data, &ctx, Instant::now())
            .await
            .unwrap()
            .condition
            .unwrap();
        assert!(cond.result);
        assert!(cond.rationale.contains("satisfies"));
    }
}

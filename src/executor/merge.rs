//! Merge node execution: combine all parents' outputs.

use std::time::Instant;

use crate::event_bus::ExecutionEvent;
use crate::workflow::{MergeData, MergeStrategy};

use super::{NodeContext, NodeExecutionError, NodeOutcome};

const DEFAULT_SEPARATOR: &str = "\n";

pub(crate) fn execute(
    data: &MergeData,
    ctx: &NodeContext,
    started: Instant,
) -> Result<NodeOutcome, NodeExecutionError> {
    // Parents that never produced an output (e.g. unreachable) are skipped;
    // a merge with zero stored parent outputs cannot proceed.
    let inputs: Vec<&str> = ctx
        .parents
        .iter()
        .filter_map(|p| ctx.outputs.get(p))
        .map(String::as_str)
        .collect();
    if inputs.is_empty() {
        return Err(NodeExecutionError::MergeWithoutParents {
            node_id: ctx.node_id.clone(),
        });
    }

    let output = combine(data, &inputs);
    let elapsed = started.elapsed().as_secs_f64();
    ctx.emit(ExecutionEvent::node_complete(&ctx.node_id, &output, elapsed))?;
    Ok(NodeOutcome {
        output,
        ..Default::default()
    })
}

fn combine(data: &MergeData, inputs: &[&str]) -> String {
    let concatenate = |inputs: &[&str]| {
        let separator = data.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR);
        inputs.join(separator)
    };

    match data.merge_strategy {
        MergeStrategy::Concatenate => concatenate(inputs),
        MergeStrategy::First => inputs.first().copied().unwrap_or_default().to_string(),
        MergeStrategy::Last => inputs.last().copied().unwrap_or_default().to_string(),
        MergeStrategy::Custom => match &data.custom_template {
            None => concatenate(inputs),
            Some(template) => {
                let mut out = template.clone();
                for (index, input) in inputs.iter().enumerate() {
                    out = out.replace(&format!("{{{{branch_{}}}}}", index + 1), input);
                }
                out
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, AgentRunner, AgentStream};
    use async_trait::async_trait;
    use rustc_hash::FxHashMap;
    use std::sync::Arc;

    struct NullAgent;

    #[async_trait]
    impl AgentRunner for NullAgent {
        async fn run(
            &self,
            _task_text: &str,
            _resume_handle: Option<&str>,
        ) -> Result<AgentStream, AgentError> {
            Err(AgentError::execution("unused"))
        }
    }

    fn ctx_with(
        parents: &[(&str, &str)],
    ) -> (NodeContext, flume::Receiver<ExecutionEvent>) {
        let (tx, rx) = flume::unbounded();
        let mut outputs = FxHashMap::default();
        for (id, output) in parents {
            outputs.insert((*id).to_string(), (*output).to_string());
        }
        let ctx = NodeContext::new(
            "m",
            "init",
            parents.iter().map(|(id, _)| (*id).to_string()).collect(),
            outputs,
            None,
            1,
            Arc::new(NullAgent),
            tx,
        );
        (ctx, rx)
    }

    fn merge_data(strategy: MergeStrategy) -> MergeData {
        MergeData {
            merge_strategy: strategy,
            separator: None,
            custom_template: None,
        }
    }

    #[test]
    /// Concatenate with separator "|" on parents "A" and "B" yields
    /// exactly "A|B".
    fn concatenate_with_pipe_separator() {
        let (ctx, _events) = ctx_with(&[("a", "A"), ("b", "B")]);
        let data = MergeData {
            merge_strategy: MergeStrategy::Concatenate,
            separator: Some("|".into()),
            custom_template: None,
        };
        let outcome = execute(&data, &ctx, Instant::now()).unwrap();
        assert_eq!(outcome.output, "A|B");
    }

    #[test]
    fn first_and_last_follow_parent_order() {
        let (ctx, _events) = ctx_with(&[("a", "A"), ("b", "B"), ("c", "C")]);
        assert_eq!(
            execute(&merge_data(MergeStrategy::First), &ctx, Instant::now())
                .unwrap()
                .output,
            "A"
        );
        assert_eq!(
            execute(&merge_data(MergeStrategy::Last), &ctx, Instant::now())
                .unwrap()
                .output,
            "C"
        );
    }

    #[test]
    fn custom_template_substitutes_branch_placeholders() {
        let (ctx, _events) = ctx_with(&[("a", "A"), ("b", "B")]);
        let data = MergeData {
            merge_strategy: MergeStrategy::Custom,
            separator: None,
            custom_template: Some("first={{branch_1}} second={{branch_2}}".into()),
        };
        let outcome = execute(&data, &ctx, Instant::now()).unwrap();
        assert_eq!(outcome.output, "first=A second=B");
    }

    #[test]
    fn custom_without_template_falls_back_to_concatenate() {
        let (ctx, _events) = ctx_with(&[("a", "A"), ("b", "B")]);
        let outcome = execute(&merge_data(MergeStrategy::Custom), &ctx, Instant::now()).unwrap();
        assert_eq!(outcome.output, "A\nB");
    }

    #[test]
    fn merge_without_parents_is_fatal() {
        let (ctx, _events) = ctx_with(&[]);
        assert!(matches!(
            execute(&merge_data(MergeStrategy::Concatenate), &ctx, Instant::now()),
            Err(NodeExecutionError::MergeWithoutParents { .. })
        ));
    }
}

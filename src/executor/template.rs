//! Task-template rendering for Worker nodes.
//!
//! Supported placeholders:
//!
//! - `{{input}}`: the workflow's initial input
//! - `{{node_<id>}}`: the named node's stored output
//! - `{{parent}}`: the single parent's output; with multiple parents the
//!   first stored output is used positionally (warned, known ambiguity)

use super::{NodeContext, NodeExecutionError};

/// Render `template` against the context, failing on unresolved
/// placeholders.
pub fn render(template: &str, ctx: &NodeContext) -> Result<String, NodeExecutionError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            // Unterminated braces are passed through verbatim.
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let name = after[..close].trim();
        out.push_str(&resolve(name, ctx)?);
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve<'a>(name: &str, ctx: &'a NodeContext) -> Result<&'a str, NodeExecutionError> {
    if name == "input" {
        return Ok(&ctx.initial_input);
    }
    if name == "parent" {
        return ctx
            .parent_output()
            .ok_or_else(|| NodeExecutionError::Template {
                node_id: ctx.node_id.clone(),
                reason: "{{parent}} used but no parent output is available".into(),
            });
    }
    if let Some(node_id) = name.strip_prefix("node_") {
        return ctx
            .outputs
            .get(node_id)
            .map(String::as_str)
            .ok_or_else(|| NodeExecutionError::Template {
                node_id: ctx.node_id.clone(),
                reason: format!("no stored output for referenced node \"{node_id}\""),
            });
    }
    Err(NodeExecutionError::Template {
        node_id: ctx.node_id.clone(),
        reason: format!("unknown placeholder \"{name}\""),
    })
}

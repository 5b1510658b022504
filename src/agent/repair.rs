//! Tool-call/tool-result pairing.
//!
//! Every assistant tool call must be answered by a tool message with the same
//! id before the next provider call. Missing answers get a synthetic
//! "interrupted" failure placed right after the answers that do exist; tool
//! messages that answer no known call are dropped.

use std::collections::HashSet;

use tracing::warn;

use crate::session::Message;
use crate::tools::ToolResult;

/// Content of a synthetic result for an unanswered call.
pub fn interrupted_result() -> ToolResult {
    ToolResult::failure("interrupted: the tool call did not complete")
}

/// Repair `messages` in place. Returns how many messages were added or removed.
pub fn repair_orphaned_tool_calls(messages: &mut Vec<Message>) -> usize {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    let mut changes = 0;
    let mut i = 0;

    while i < messages.len() {
        let msg = &messages[i];
        if msg.is_tool_result() {
            // Not directly behind an assistant turn that asked for it.
            warn!(
                tool_call_id = msg.tool_call_id.as_deref().unwrap_or(""),
                "Dropping orphaned tool result"
            );
            changes += 1;
            i += 1;
            continue;
        }

        out.push(msg.clone());
        i += 1;

        let Some(calls) = msg.tool_calls.as_ref().filter(|c| !c.is_empty()) else {
            continue;
        };

        let expected: HashSet<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        let mut answered: HashSet<String> = HashSet::new();
        while i < messages.len() && messages[i].is_tool_result() {
            let result = &messages[i];
            let id = result.tool_call_id.as_deref().unwrap_or("");
            if expected.contains(id) && answered.insert(id.to_string()) {
                out.push(result.clone());
            } else {
                warn!(tool_call_id = id, "Dropping tool result for unknown call");
                changes += 1;
            }
            i += 1;
        }

        for call in calls {
            if !answered.contains(&call.id) {
                warn!(tool = %call.name, tool_call_id = %call.id, "Synthesizing interrupted result");
                out.push(Message::tool_result(
                    &call.id,
                    &call.name,
                    &interrupted_result().format(),
                ));
                changes += 1;
            }
        }
    }

    if changes > 0 {
        *messages = out;
    }
    changes
}

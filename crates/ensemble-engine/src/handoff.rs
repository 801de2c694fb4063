//! Swarm handoffs expressed as synthetic tools.
//!
//! A handoff is a tool call named `transfer_to_<agent>` whose only
//! semantic effect is naming the next agent; executing it yields an empty
//! tool message and ends the issuing agent's turn. Handoff topology is
//! plain data (name to targets), so there are no reference cycles between
//! agent objects.

use async_trait::async_trait;
use ensemble_contract::{Tool, ToolCall, ToolDescriptor, ToolError, ToolResult};
use serde_json::Value;

/// Name prefix shared by all handoff tools.
pub const HANDOFF_PREFIX: &str = "transfer_to_";

/// Tool name for a handoff to `target`.
pub fn handoff_tool_name(target: &str) -> String {
    format!("{HANDOFF_PREFIX}{target}")
}

/// The handoff target named by a batch of tool calls, if any.
///
/// When the model emits several handoffs in one reply, the first wins.
pub fn handoff_target_in(calls: &[ToolCall]) -> Option<String> {
    calls
        .iter()
        .find_map(|c| c.name.strip_prefix(HANDOFF_PREFIX))
        .map(str::to_string)
}

/// Synthetic tool that names a peer agent as the next to act.
pub struct HandoffTool {
    target: String,
}

impl HandoffTool {
    /// Create a handoff tool for the given peer.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[async_trait]
impl Tool for HandoffTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            handoff_tool_name(&self.target),
            format!(
                "Hand the conversation to the '{}' agent. \
                 Use this when their expertise is needed; do not answer on their behalf.",
                self.target
            ),
        )
        .with_parameters(serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }))
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
        // The coordinator reads the target from the call name; the tool
        // result stays empty by contract.
        Ok(ToolResult::success(
            handoff_tool_name(&self.target),
            Value::String(String::new()),
        ))
    }
}

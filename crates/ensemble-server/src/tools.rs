//! Built-in demonstration tools registered by the server.

use async_trait::async_trait;
use ensemble_contract::{Tool, ToolDescriptor, ToolError, ToolResult, TypedTool};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

/// Arguments for [`EchoTool`].
#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoArgs {
    /// Text to echo back.
    pub text: String,
}

/// Echoes its input. Useful for wiring checks and demos.
pub struct EchoTool;

#[async_trait]
impl TypedTool for EchoTool {
    type Args = EchoArgs;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back unchanged."
    }

    async fn execute(&self, args: EchoArgs) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::success("echo", Value::String(args.text)))
    }
}

/// Reports the server name and current unix timestamp.
pub struct ServerTimeTool;

#[async_trait]
impl Tool for ServerTimeTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "server_time",
            "Returns the server name and the current unix timestamp.",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        }))
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| ToolError::Internal(e.to_string()))?
            .as_secs();
        Ok(ToolResult::success(
            "server_time",
            json!({ "server": "ensemble", "timestamp": now }),
        ))
    }
}

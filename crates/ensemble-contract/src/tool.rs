//! Tool contract: execution trait, descriptor, and results.
//!
//! Tools are async handlers that take a JSON argument object and return a
//! string or structured result. Raised errors never escape the executor;
//! they become tool-message content through the error mapper.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Tool execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Execution succeeded.
    Success,
    /// Execution is waiting for an external decision.
    Pending,
    /// Execution failed at the tool level.
    Error,
}

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool name.
    pub tool_name: String,
    /// Execution status.
    pub status: ToolStatus,
    /// Result data, a string or structured value.
    pub data: Value,
    /// Optional human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ToolResult {
    /// Create a success result.
    pub fn success(tool_name: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            status: ToolStatus::Success,
            data: data.into(),
            message: None,
        }
    }

    /// Create an error result.
    pub fn error(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            tool_name: tool_name.into(),
            status: ToolStatus::Error,
            data: Value::Null,
            message: Some(message),
        }
    }

    /// Create a pending result (waiting for an external decision).
    pub fn pending(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            status: ToolStatus::Pending,
            data: Value::Null,
            message: Some(message.into()),
        }
    }

    /// Check if execution succeeded.
    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Check if execution failed.
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }

    /// Render this result as tool-message content.
    ///
    /// String data passes through verbatim so models see plain text; any
    /// other value is serialized as JSON.
    pub fn render(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            Value::Null => self.message.clone().unwrap_or_default(),
            other => serde_json::to_string(other)
                .unwrap_or_else(|_| self.message.clone().unwrap_or_default()),
        }
    }
}

/// Tool execution errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Tool metadata exposed to models and registries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name (snake_case), the registry key.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema for the argument object.
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Create a new descriptor with a permissive empty-object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    /// Set the parameter schema.
    #[must_use]
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }
}

/// Trait for implementing agent tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool descriptor.
    fn descriptor(&self) -> ToolDescriptor;

    /// Validate arguments against the descriptor's JSON Schema before execution.
    ///
    /// The default implementation uses [`validate_against_schema`] with
    /// `descriptor().parameters`. Override to customise or skip validation.
    fn validate_args(&self, args: &Value) -> Result<(), ToolError> {
        validate_against_schema(&self.descriptor().parameters, args)
    }

    /// Execute the tool with the decoded argument object.
    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError>;
}

/// Validate a JSON value against a JSON Schema.
///
/// Returns `Ok(())` if the value conforms, or
/// `Err(ToolError::InvalidArguments)` describing all violations.
pub fn validate_against_schema(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::Validator::new(schema)
        .map_err(|e| ToolError::Internal(format!("invalid tool schema: {e}")))?;
    if validator.is_valid(args) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
    Err(ToolError::InvalidArguments(errors.join("; ")))
}

/// Strongly-typed variant of [`Tool`] with automatic schema generation.
///
/// Implement this trait instead of [`Tool`] when the tool has a fixed
/// parameter shape; a blanket impl provides [`Tool`] automatically.
#[async_trait]
pub trait TypedTool: Send + Sync {
    /// Argument type, must derive `Deserialize` and `JsonSchema`.
    type Args: for<'de> Deserialize<'de> + JsonSchema + Send;

    /// Unique tool name (snake_case).
    fn name(&self) -> &str;

    /// Tool description shown to the model.
    fn description(&self) -> &str;

    /// Optional business-logic validation after deserialization.
    fn validate(&self, _args: &Self::Args) -> Result<(), String> {
        Ok(())
    }

    /// Execute with typed arguments.
    async fn execute(&self, args: Self::Args) -> Result<ToolResult, ToolError>;
}

/// Generate the JSON Schema for a typed tool's arguments.
fn typed_tool_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

#[async_trait]
impl<T: TypedTool> Tool for T {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(self.name(), self.description())
            .with_parameters(typed_tool_schema::<T::Args>())
    }

    /// Skips schema validation; `from_value` deserialization covers it.
    fn validate_args(&self, _args: &Value) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let typed: T::Args = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        self.validate(&typed)
            .map_err(ToolError::InvalidArguments)?;
        TypedTool::execute(self, typed).await
    }
}

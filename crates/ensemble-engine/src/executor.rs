//! Tool batch execution.
//!
//! The executor consumes an assistant message carrying tool calls and
//! produces exactly one tool message per call, in call order. It never
//! returns an error: unknown tools, validation failures, raised errors,
//! and timeouts all become tool-message content through the error mapper,
//! so the model sees a normal tool result it can react to.

use ensemble_contract::{ErrorMapper, Message, Tool, ToolCall, ToolError, ToolResult};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Default per-call timeout.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of executing one assistant message's tool batch.
#[derive(Debug)]
pub enum ToolBatchOutcome {
    /// Every call produced a tool message, in call order.
    Completed(Vec<Message>),
    /// The batch contains a call from the interrupt set; nothing was
    /// executed. The turn suspends for an external decision.
    Suspended(Vec<ToolCall>),
}

/// Executes tool calls against an immutable tool-map snapshot.
pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
    error_mapper: ErrorMapper,
    call_timeout: Duration,
    interrupt_before: HashSet<String>,
}

impl ToolExecutor {
    /// Create an executor over a tool snapshot and error mapper.
    pub fn new(tools: HashMap<String, Arc<dyn Tool>>, error_mapper: ErrorMapper) -> Self {
        Self {
            tools,
            error_mapper,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            interrupt_before: HashSet::new(),
        }
    }

    /// Set the per-call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set tool names that force a suspension before execution.
    #[must_use]
    pub fn with_interrupt_before(mut self, names: HashSet<String>) -> Self {
        self.interrupt_before = names;
        self
    }

    /// Add a tool to this executor's snapshot.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.descriptor().name, tool);
        self
    }

    /// Whether the snapshot contains a tool by name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Execute the tool calls of an assistant message.
    ///
    /// Independent calls run concurrently; results come back in the order
    /// the calls appeared. An assistant message without tool calls yields
    /// an empty completed batch.
    pub async fn execute(&self, assistant: &Message) -> ToolBatchOutcome {
        let calls = assistant.calls();

        let flagged: Vec<ToolCall> = calls
            .iter()
            .filter(|c| self.interrupt_before.contains(&c.name))
            .cloned()
            .collect();
        if !flagged.is_empty() {
            tracing::info!(
                calls = flagged.len(),
                "suspending turn before interrupt-listed tools"
            );
            return ToolBatchOutcome::Suspended(flagged);
        }

        let executions = calls.iter().map(|call| self.execute_one(call));
        ToolBatchOutcome::Completed(join_all(executions).await)
    }

    /// Execute one call into its tool message. Infallible by construction.
    async fn execute_one(&self, call: &ToolCall) -> Message {
        let Some(tool) = self.tools.get(&call.name) else {
            return Message::tool(
                &call.id,
                format!("Tool '{}' is not available.", call.name),
            );
        };

        if let Err(e) = tool.validate_args(&call.arguments) {
            return Message::tool(&call.id, self.error_mapper.render(&call.name, &e));
        }

        let result = tokio::time::timeout(self.call_timeout, tool.execute(call.arguments.clone()))
            .await
            .unwrap_or_else(|_| Err(ToolError::Timeout(self.call_timeout)));

        match result {
            Ok(result) => Message::tool(&call.id, render_result(&call.name, &result)),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool raised; absorbing into tool message");
                Message::tool(&call.id, self.error_mapper.render(&call.name, &e))
            }
        }
    }
}

fn render_result(tool_name: &str, result: &ToolResult) -> String {
    if result.is_error() {
        let detail = result.message.clone().unwrap_or_else(|| result.render());
        return format!("Tool '{tool_name}' reported an error: {detail}");
    }
    result.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ensemble_contract::{ReportingMode, ToolDescriptor};
    use serde_json::{json, Value};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("echo", "Echo the text argument")
        }

        async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success("echo", args["text"].clone()))
        }
    }

    struct RaisingTool;

    #[async_trait]
    impl Tool for RaisingTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("raising", "Always raises")
        }

        async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
            Err(ToolError::InvalidArguments("expected a city".to_string()))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("slow", "Sleeps past the timeout")
        }

        async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolResult::success("slow", Value::Null))
        }
    }

    fn executor_with(tools: Vec<Arc<dyn Tool>>) -> ToolExecutor {
        let map = tools
            .into_iter()
            .map(|t| (t.descriptor().name, t))
            .collect();
        ToolExecutor::new(map, ErrorMapper::new(ReportingMode::Development))
    }

    fn completed(outcome: ToolBatchOutcome) -> Vec<Message> {
        match outcome {
            ToolBatchOutcome::Completed(messages) => messages,
            ToolBatchOutcome::Suspended(_) => panic!("batch unexpectedly suspended"),
        }
    }

    #[tokio::test]
    async fn one_tool_message_per_call_in_order() {
        let executor = executor_with(vec![Arc::new(EchoTool)]);
        let assistant = Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCall::new("c1", "echo", json!({"text": "first"})),
                ToolCall::new("c2", "echo", json!({"text": "second"})),
                ToolCall::new("c3", "echo", json!({"text": "third"})),
            ],
        );

        let messages = completed(executor.execute(&assistant).await);
        assert_eq!(messages.len(), 3);
        for (msg, (id, text)) in messages
            .iter()
            .zip([("c1", "first"), ("c2", "second"), ("c3", "third")])
        {
            assert_eq!(msg.tool_call_id.as_deref(), Some(id));
            assert_eq!(msg.content, text);
        }
    }

    #[tokio::test]
    async fn unknown_tool_produces_diagnostic_not_error() {
        let executor = executor_with(vec![]);
        let assistant = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("c1", "missing_tool", json!({}))],
        );

        let messages = completed(executor.execute(&assistant).await);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("missing_tool"));
        assert!(messages[0].content.contains("not available"));
    }

    #[tokio::test]
    async fn raised_errors_are_absorbed_via_mapper() {
        let executor = executor_with(vec![Arc::new(RaisingTool)]);
        let assistant = Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCall::new("c1", "raising", json!({})),
                ToolCall::new("c2", "raising", json!({})),
            ],
        );

        let messages = completed(executor.execute(&assistant).await);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("validation"));
        // Development mode carries the underlying detail.
        assert!(messages[0].content.contains("expected a city"));
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn timeout_becomes_tool_message() {
        let executor = executor_with(vec![Arc::new(SlowTool)])
            .with_call_timeout(Duration::from_millis(20));
        let assistant =
            Message::assistant_with_tool_calls("", vec![ToolCall::new("c1", "slow", json!({}))]);

        let messages = completed(executor.execute(&assistant).await);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("timeout"));
    }

    #[tokio::test]
    async fn interrupt_set_suspends_batch_without_executing() {
        let executor = executor_with(vec![Arc::new(EchoTool)])
            .with_interrupt_before(HashSet::from(["echo".to_string()]));
        let assistant = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("c1", "echo", json!({"text": "hi"}))],
        );

        match executor.execute(&assistant).await {
            ToolBatchOutcome::Suspended(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "echo");
            }
            ToolBatchOutcome::Completed(_) => panic!("expected suspension"),
        }
    }

    #[tokio::test]
    async fn assistant_without_calls_yields_empty_batch() {
        let executor = executor_with(vec![]);
        let messages = completed(executor.execute(&Message::assistant("plain")).await);
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn tool_level_error_result_is_rendered() {
        struct SoftFailTool;
        #[async_trait]
        impl Tool for SoftFailTool {
            fn descriptor(&self) -> ToolDescriptor {
                ToolDescriptor::new("soft", "Returns a tool-level error result")
            }
            async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
                Ok(ToolResult::error("soft", "no rows matched"))
            }
        }

        let executor = executor_with(vec![Arc::new(SoftFailTool)]);
        let assistant =
            Message::assistant_with_tool_calls("", vec![ToolCall::new("c1", "soft", json!({}))]);
        let messages = completed(executor.execute(&assistant).await);
        assert!(messages[0].content.contains("no rows matched"));
    }
}

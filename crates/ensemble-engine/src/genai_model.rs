//! Default [`ChatModel`] implementation over `genai::Client`.

use crate::convert::{build_request, reply_from_response};
use async_stream::stream;
use async_trait::async_trait;
use ensemble_contract::{ChatModel, ChunkStream, Message, ModelError, StreamEvent, ToolCall, ToolDescriptor};
use futures::StreamExt;
use genai::chat::{ChatOptions, ChatStreamEvent};
use genai::Client;
use serde_json::Value;
use std::collections::HashMap;

/// Chat model backed by a `genai::Client` and a fixed model id.
#[derive(Clone)]
pub struct GenaiChatModel {
    client: Client,
    model: String,
    options: ChatOptions,
}

impl std::fmt::Debug for GenaiChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenaiChatModel")
            .field("model", &self.model)
            .finish()
    }
}

impl GenaiChatModel {
    /// Create a model over the default client.
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_client(Client::default(), model)
    }

    /// Create a model over a custom client (custom endpoints, auth).
    pub fn with_client(client: Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            options: ChatOptions::default()
                .with_capture_usage(true)
                .with_capture_tool_calls(true),
        }
    }
}

#[async_trait]
impl ChatModel for GenaiChatModel {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Message, ModelError> {
        let request = build_request(messages, tools);
        let response = self
            .client
            .exec_chat(&self.model, request, Some(&self.options))
            .await
            .map_err(|e| ModelError::Provider(e.to_string()))?;
        Ok(reply_from_response(&response))
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ChunkStream, ModelError> {
        let request = build_request(messages, tools);
        let response = self
            .client
            .exec_chat_stream(&self.model, request, Some(&self.options))
            .await
            .map_err(|e| ModelError::Provider(e.to_string()))?;

        let mut inner = response.stream;
        let events = stream! {
            let mut collector = StreamCollector::default();
            while let Some(event) = inner.next().await {
                match event {
                    Ok(event) => {
                        if let Some(delta) = collector.absorb(event) {
                            yield Ok(StreamEvent::TextDelta { delta });
                        }
                    }
                    Err(e) => {
                        yield Err(ModelError::Provider(e.to_string()));
                        return;
                    }
                }
            }
            yield Ok(StreamEvent::Completed { message: collector.finish() });
        };
        Ok(Box::pin(events))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Default)]
struct PartialToolCall {
    name: String,
    arguments: String,
}

/// Accumulates genai stream events into one assistant message.
///
/// Providers send tool-call chunks with ACCUMULATED argument strings, and
/// the End event carries the authoritative captured calls, so chunk
/// arguments replace rather than append and End overrides everything.
#[derive(Default)]
struct StreamCollector {
    text: String,
    tool_calls: HashMap<String, PartialToolCall>,
    tool_call_order: Vec<String>,
}

impl StreamCollector {
    /// Fold one event in; returns new assistant text when present.
    fn absorb(&mut self, event: ChatStreamEvent) -> Option<String> {
        match event {
            ChatStreamEvent::Chunk(chunk) => {
                if chunk.content.is_empty() {
                    None
                } else {
                    self.text.push_str(&chunk.content);
                    Some(chunk.content)
                }
            }
            ChatStreamEvent::ToolCallChunk(tool_chunk) => {
                let call = tool_chunk.tool_call;
                let partial = self.partial_for(&call.call_id);
                if !call.fn_name.is_empty() && partial.name.is_empty() {
                    partial.name = call.fn_name;
                }
                let args = raw_argument_string(&call.fn_arguments);
                if !args.is_empty() {
                    partial.arguments = args;
                }
                None
            }
            ChatStreamEvent::End(end) => {
                if let Some(calls) = end.captured_tool_calls() {
                    for call in calls {
                        let args = raw_argument_string(&call.fn_arguments);
                        let partial = self.partial_for(&call.call_id);
                        if partial.name.is_empty() {
                            partial.name = call.fn_name.clone();
                        }
                        if !args.is_empty() {
                            partial.arguments = args;
                        }
                    }
                }
                None
            }
            _ => None,
        }
    }

    fn partial_for(&mut self, call_id: &str) -> &mut PartialToolCall {
        if !self.tool_calls.contains_key(call_id) {
            self.tool_call_order.push(call_id.to_string());
        }
        self.tool_calls.entry(call_id.to_string()).or_default()
    }

    fn finish(mut self) -> Message {
        let mut calls = Vec::with_capacity(self.tool_call_order.len());
        for call_id in &self.tool_call_order {
            let Some(partial) = self.tool_calls.remove(call_id) else {
                continue;
            };
            if partial.name.is_empty() {
                continue;
            }
            let arguments = serde_json::from_str(&partial.arguments).unwrap_or(Value::Null);
            calls.push(ToolCall::new(call_id, partial.name, arguments));
        }
        if calls.is_empty() {
            Message::assistant(self.text)
        } else {
            Message::assistant_with_tool_calls(self.text, calls)
        }
    }
}

/// Extract the raw argument string from a chunk's `fn_arguments`.
/// Providers wrap in-flight argument text in `Value::String`; taking
/// `.to_string()` there would add JSON quoting.
fn raw_argument_string(arguments: &Value) -> String {
    match arguments {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genai::chat::{StreamChunk, StreamEnd, ToolChunk};
    use serde_json::json;

    fn tc_chunk(call_id: &str, fn_name: &str, args: &str) -> ChatStreamEvent {
        ChatStreamEvent::ToolCallChunk(ToolChunk {
            tool_call: genai::chat::ToolCall {
                call_id: call_id.to_string(),
                fn_name: fn_name.to_string(),
                fn_arguments: Value::String(args.to_string()),
            },
        })
    }

    #[test]
    fn collector_accumulates_text() {
        let mut collector = StreamCollector::default();
        for word in ["The ", "quick ", "fox."] {
            let delta = collector.absorb(ChatStreamEvent::Chunk(StreamChunk {
                content: word.to_string(),
            }));
            assert_eq!(delta.as_deref(), Some(word));
        }
        let message = collector.finish();
        assert_eq!(message.content, "The quick fox.");
        assert!(!message.requests_tools());
    }

    #[test]
    fn collector_builds_tool_calls_from_accumulated_args() {
        let mut collector = StreamCollector::default();
        collector.absorb(tc_chunk("c1", "search", ""));
        collector.absorb(tc_chunk("c1", "", r#"{"q":"#));
        collector.absorb(tc_chunk("c1", "", r#"{"q":"rust"}"#));

        let message = collector.finish();
        let calls = message.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, json!({"q": "rust"}));
    }

    #[test]
    fn collector_preserves_call_order() {
        let mut collector = StreamCollector::default();
        for (id, name) in [("c7", "a"), ("c2", "b"), ("c9", "c")] {
            collector.absorb(tc_chunk(id, name, "{}"));
        }
        let message = collector.finish();
        let ids: Vec<&str> = message.calls().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c7", "c2", "c9"]);
    }

    #[test]
    fn end_event_overrides_truncated_args() {
        use genai::chat::MessageContent;

        let mut collector = StreamCollector::default();
        collector.absorb(tc_chunk("c1", "api", r#"{"partial":tr"#));

        let end_call = genai::chat::ToolCall {
            call_id: "c1".to_string(),
            fn_name: String::new(),
            fn_arguments: Value::String(r#"{"complete":true}"#.to_string()),
        };
        collector.absorb(ChatStreamEvent::End(StreamEnd {
            captured_content: Some(MessageContent::from_tool_calls(vec![end_call])),
            ..Default::default()
        }));

        let message = collector.finish();
        assert_eq!(message.calls()[0].arguments, json!({"complete": true}));
    }

    #[test]
    fn ghost_calls_without_names_are_dropped() {
        let mut collector = StreamCollector::default();
        collector.absorb(tc_chunk("ghost", "", "{}"));
        collector.absorb(tc_chunk("real", "search", r#"{"q":"x"}"#));
        let message = collector.finish();
        assert_eq!(message.calls().len(), 1);
        assert_eq!(message.calls()[0].id, "real");
    }

    #[test]
    fn truncated_json_degrades_to_null() {
        let mut collector = StreamCollector::default();
        collector.absorb(tc_chunk("c1", "search", r#"{"q": "unterminat"#));
        let message = collector.finish();
        assert_eq!(message.calls()[0].arguments, Value::Null);
    }
}

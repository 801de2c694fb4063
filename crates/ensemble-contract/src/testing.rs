//! Test doubles shared across the workspace.
//!
//! [`ScriptedModel`] replays a fixed sequence of assistant messages and
//! records every request it receives, which is enough to drive the agent
//! loop and all three coordinator topologies deterministically in tests.

use crate::message::{Message, ToolCall};
use crate::model::{ChatModel, ModelError};
use crate::tool::ToolDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// What a [`ScriptedModel`] does when its script runs dry.
#[derive(Debug, Clone)]
pub enum OnEmpty {
    /// Return a provider error.
    Error,
    /// Repeat the last scripted reply indefinitely.
    RepeatLast,
}

/// A chat model that replays scripted assistant replies in order.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Message>>,
    last: Mutex<Option<Message>>,
    requests: Mutex<Vec<Vec<Message>>>,
    on_empty: OnEmpty,
}

impl ScriptedModel {
    /// Script the given replies; erroring once they are exhausted.
    pub fn new(replies: impl IntoIterator<Item = Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            on_empty: OnEmpty::Error,
        }
    }

    /// Script replies and repeat the last one forever once exhausted.
    pub fn looping(replies: impl IntoIterator<Item = Message>) -> Self {
        Self {
            on_empty: OnEmpty::RepeatLast,
            ..Self::new(replies)
        }
    }

    /// Convenience: a single plain-text assistant reply.
    pub fn single(text: impl Into<String>) -> Self {
        Self::new([Message::assistant(text)])
    }

    /// An assistant reply whose content is a serialized JSON object, as a
    /// structured-decision stub would produce.
    pub fn json_reply(value: &Value) -> Message {
        Message::assistant(value.to_string())
    }

    /// An assistant reply carrying tool calls.
    pub fn tool_call_reply(content: impl Into<String>, calls: Vec<ToolCall>) -> Message {
        Message::assistant_with_tool_calls(content, calls)
    }

    /// Message sequences this model has been invoked with, in order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(
        &self,
        messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<Message, ModelError> {
        self.requests.lock().unwrap().push(messages.to_vec());

        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => {
                *self.last.lock().unwrap() = Some(reply.clone());
                Ok(reply)
            }
            None => match &self.on_empty {
                OnEmpty::RepeatLast => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| ModelError::Provider("scripted model is empty".to_string())),
                OnEmpty::Error => Err(ModelError::Provider(
                    "scripted model exhausted".to_string(),
                )),
            },
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A model that always fails with the given error message.
///
/// Useful for exercising retry and classification paths.
pub struct FailingModel {
    pub message: String,
    calls: Mutex<usize>,
}

impl FailingModel {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: Mutex::new(0),
        }
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ChatModel for FailingModel {
    async fn invoke(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<Message, ModelError> {
        *self.calls.lock().unwrap() += 1;
        Err(ModelError::Provider(self.message.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

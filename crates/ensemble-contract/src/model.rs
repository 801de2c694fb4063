//! Chat model provider contract.
//!
//! The engine talks to language models through [`ChatModel`]. The default
//! implementation lives in the engine crate and delegates to `genai`;
//! tests use the scripted model from [`crate::testing`].

use crate::message::Message;
use crate::tool::ToolDescriptor;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by model providers.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("model call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error("model stream cancelled")]
    Cancelled,
}

/// One event from a streaming model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta { delta: String },
    /// The complete assistant message, emitted once at the end.
    Completed { message: Message },
}

/// Boxed stream of model events.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ModelError>> + Send>>;

/// Abstraction over chat-completion backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run a non-streaming completion and return the assistant message.
    ///
    /// `tools` are the descriptors bound for this call; an empty slice
    /// means the model may not call tools.
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Message, ModelError>;

    /// Run a streaming completion.
    ///
    /// The default implementation wraps [`ChatModel::invoke`] in a
    /// single-chunk stream, which is correct for backends without native
    /// streaming.
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ChunkStream, ModelError> {
        let message = self.invoke(messages, tools).await?;
        let events = futures::stream::iter(vec![
            Ok(StreamEvent::TextDelta {
                delta: message.content.clone(),
            }),
            Ok(StreamEvent::Completed { message }),
        ]);
        Ok(Box::pin(events))
    }

    /// Stable label for logging.
    fn name(&self) -> &str {
        "chat_model"
    }
}

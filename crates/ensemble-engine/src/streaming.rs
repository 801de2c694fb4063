//! Turn event streaming with backpressure.
//!
//! Turns accept an optional bounded event channel. Model text is
//! forwarded chunk by chunk as it is produced; when the consumer stops
//! draining, the send times out and the turn is cancelled at the next
//! suspension point. Events are a presentation concern: state advances
//! only by whole-message appends.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a send may wait on a full channel before the consumer is
/// considered gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound for event channels created by [`event_channel`].
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Events emitted while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A coordinator dispatched an agent.
    AgentDispatched { agent: String },
    /// Incremental assistant text from the named agent.
    TextDelta { agent: String, delta: String },
    /// A tool call started executing.
    ToolCallStart { id: String, name: String },
    /// A tool call finished and produced its tool message.
    ToolCallDone { id: String },
    /// The turn completed with a final response.
    TurnCompleted { response: String },
    /// The turn failed.
    TurnError { message: String },
}

/// Sender half of a turn event channel.
pub type EventSink = mpsc::Sender<AgentEvent>;

/// Create a bounded event channel suitable for one turn.
pub fn event_channel() -> (EventSink, mpsc::Receiver<AgentEvent>) {
    mpsc::channel(DEFAULT_EVENT_BUFFER)
}

/// Forward an event, detecting an absent or stalled consumer.
///
/// Returns `false` when the consumer is gone (closed channel or drain
/// timeout); callers treat that as a cancellation signal.
pub(crate) async fn emit(sink: Option<&EventSink>, event: AgentEvent) -> bool {
    let Some(sink) = sink else {
        return true;
    };
    match sink.send_timeout(event, DRAIN_TIMEOUT).await {
        Ok(()) => true,
        Err(mpsc::error::SendTimeoutError::Closed(_)) => {
            tracing::debug!("event consumer closed; cancelling turn");
            false
        }
        Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
            tracing::warn!("event consumer stalled; cancelling turn");
            false
        }
    }
}

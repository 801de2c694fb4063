//! Per-thread agent state and the reducer delta applied at node boundaries.
//!
//! Graph nodes never mutate [`AgentState`] directly. Each node returns a
//! [`StateDelta`] and the runtime folds it in through
//! [`StateDelta::apply_to`], which is the single reducer. This keeps
//! checkpointing and replay trivial: persisted state is always the result
//! of a sequence of reducer applications.

use crate::message::{Message, Role};
use serde::{Deserialize, Serialize};

/// Default iteration cap applied when none is supplied on creation.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Conversation state attached to one thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Thread identifier this state belongs to.
    pub thread_id: String,
    /// Ordered conversation messages, append-only.
    pub messages: Vec<Message>,
    /// Opaque caller identifier, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Opaque session identifier, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Coordinator steps taken so far in this thread's active turn.
    pub iteration_count: u32,
    /// Hard cap on coordinator steps.
    pub max_iterations: u32,
    /// Routing hint written by the router, cleared on dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_agent: Option<String>,
    /// Routing hint written by the supervisor, cleared on dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_worker: Option<String>,
    /// Swarm handoff target written by a transfer tool, cleared on dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_target: Option<String>,
    /// The `llm_input_messages` channel: the window hook's output for the
    /// next model call. Never persisted.
    #[serde(skip)]
    pub llm_input: Vec<Message>,
}

impl AgentState {
    /// Create empty state for a thread with the default iteration cap.
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            user_id: None,
            session_id: None,
            iteration_count: 0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            next_agent: None,
            next_worker: None,
            handoff_target: None,
            llm_input: Vec::new(),
        }
    }

    /// Set the user identifier.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the session identifier.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the iteration cap. Values below one are clamped to one.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Returns `true` once the iteration cap has been reached.
    pub fn cap_reached(&self) -> bool {
        self.iteration_count >= self.max_iterations
    }

    /// The last message in the thread, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Content of the most recent assistant message, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// The trailing assistant message whose tool calls have no responses yet.
    ///
    /// Present after a resume from a checkpoint taken between the model
    /// step and the tool step; the runtime routes such a turn into the
    /// tool node first.
    pub fn pending_tool_step(&self) -> Option<&Message> {
        let last = self.messages.last()?;
        if last.requests_tools() {
            Some(last)
        } else {
            None
        }
    }
}

/// Update to a routing-hint field carried by a [`StateDelta`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintUpdate {
    /// Leave the field as it is.
    #[default]
    Keep,
    /// Write a value.
    Set(String),
    /// Clear the field.
    Clear,
}

impl HintUpdate {
    fn apply(&self, slot: &mut Option<String>) {
        match self {
            HintUpdate::Keep => {}
            HintUpdate::Set(value) => *slot = Some(value.clone()),
            HintUpdate::Clear => *slot = None,
        }
    }
}

/// Delta returned by a graph node, folded into [`AgentState`] by the reducer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDelta {
    /// Messages to append, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    /// Zero the counter before applying the increment. Written only by
    /// the delta that opens a new user turn; the cap bounds one turn,
    /// not the lifetime of the thread.
    #[serde(default)]
    pub iteration_reset: bool,
    /// Saturating increment for `iteration_count`.
    #[serde(default)]
    pub iteration_increment: u32,
    #[serde(default, skip_serializing_if = "is_keep")]
    pub next_agent: HintUpdate,
    #[serde(default, skip_serializing_if = "is_keep")]
    pub next_worker: HintUpdate,
    #[serde(default, skip_serializing_if = "is_keep")]
    pub handoff_target: HintUpdate,
    /// Replacement for the transient `llm_input` channel.
    #[serde(skip)]
    pub llm_input: Option<Vec<Message>>,
}

fn is_keep(update: &HintUpdate) -> bool {
    *update == HintUpdate::Keep
}

impl StateDelta {
    /// Create an empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message.
    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Append several messages.
    #[must_use]
    pub fn with_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    /// Zero the iteration counter when this delta applies.
    #[must_use]
    pub fn with_iteration_reset(mut self) -> Self {
        self.iteration_reset = true;
        self
    }

    /// Add to the iteration counter.
    #[must_use]
    pub fn with_iteration_increment(mut self, by: u32) -> Self {
        self.iteration_increment = self.iteration_increment.saturating_add(by);
        self
    }

    /// Write the `next_agent` hint.
    #[must_use]
    pub fn set_next_agent(mut self, agent: impl Into<String>) -> Self {
        self.next_agent = HintUpdate::Set(agent.into());
        self
    }

    /// Clear the `next_agent` hint.
    #[must_use]
    pub fn clear_next_agent(mut self) -> Self {
        self.next_agent = HintUpdate::Clear;
        self
    }

    /// Write the `next_worker` hint.
    #[must_use]
    pub fn set_next_worker(mut self, worker: impl Into<String>) -> Self {
        self.next_worker = HintUpdate::Set(worker.into());
        self
    }

    /// Clear the `next_worker` hint.
    #[must_use]
    pub fn clear_next_worker(mut self) -> Self {
        self.next_worker = HintUpdate::Clear;
        self
    }

    /// Write the `handoff_target` hint.
    #[must_use]
    pub fn set_handoff_target(mut self, target: impl Into<String>) -> Self {
        self.handoff_target = HintUpdate::Set(target.into());
        self
    }

    /// Clear the `handoff_target` hint.
    #[must_use]
    pub fn clear_handoff_target(mut self) -> Self {
        self.handoff_target = HintUpdate::Clear;
        self
    }

    /// Replace the transient `llm_input` channel.
    #[must_use]
    pub fn with_llm_input(mut self, messages: Vec<Message>) -> Self {
        self.llm_input = Some(messages);
        self
    }

    /// Returns `true` if applying this delta would change nothing.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && !self.iteration_reset
            && self.iteration_increment == 0
            && self.next_agent == HintUpdate::Keep
            && self.next_worker == HintUpdate::Keep
            && self.handoff_target == HintUpdate::Keep
            && self.llm_input.is_none()
    }

    /// The reducer: fold this delta into `state`.
    pub fn apply_to(&self, state: &mut AgentState) {
        state.messages.extend(self.messages.iter().cloned());
        if self.iteration_reset {
            state.iteration_count = 0;
        }
        state.iteration_count = state
            .iteration_count
            .saturating_add(self.iteration_increment);
        self.next_agent.apply(&mut state.next_agent);
        self.next_worker.apply(&mut state.next_worker);
        self.handoff_target.apply(&mut state.handoff_target);
        if let Some(input) = &self.llm_input {
            state.llm_input = input.clone();
        }
    }
}

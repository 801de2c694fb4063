//! The single tool-using agent: a two-node graph of model step and tool
//! step, checkpointed at every node boundary.
//!
//! ```text
//! start -> [agent-node] -> decision
//!                            |- has tool_calls -> [tool-node] -> [agent-node]
//!                            '- otherwise      -> end
//! ```
//!
//! The agent-node runs the window hook, calls the model with the bound
//! tool list, and returns an assistant-message delta. The tool-node is
//! the tool executor. A trailing assistant message with unanswered tool
//! calls at entry routes into the tool node first, which is what makes
//! resume-from-checkpoint and suspension work: persisted state is always
//! at a node boundary.

use crate::executor::{ToolBatchOutcome, ToolExecutor};
use crate::handoff::handoff_target_in;
use crate::streaming::{emit, AgentEvent, EventSink};
use crate::window::WindowMemory;
use ensemble_contract::{
    classify_model_error, AgentState, ChatModel, CheckpointStore, CheckpointStoreError,
    ErrorCategory, ErrorMapper, Message, ModelError, RetryPolicy, StateDelta, StreamEvent, Tool,
    ToolDescriptor, Version, VersionPrecondition, DEFAULT_MAX_ITERATIONS,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// System prompt used when none is supplied.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the available tools when they help you answer; \
     otherwise answer directly.";

/// Deterministic assistant message appended when the iteration cap fires.
pub fn iteration_cap_message(max_iterations: u32) -> Message {
    Message::assistant(format!(
        "Stopping: the maximum of {max_iterations} iterations for this turn was reached \
         before a final answer."
    ))
}

/// Errors that abort a turn.
#[derive(Debug, thiserror::Error)]
pub enum AgentLoopError {
    #[error("model error ({category}): {message}")]
    Llm {
        category: ErrorCategory,
        message: String,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointStoreError),
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The model produced a reply without tool calls, or handed off.
    NaturalEnd,
    /// The iteration cap fired. Not an error.
    CapReached,
    /// Execution stopped before an interrupt-listed tool.
    Suspended,
    /// The turn was cancelled; the last committed checkpoint stands.
    Cancelled,
}

/// Result of one agent or coordinator turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub state: AgentState,
    pub termination: Termination,
    /// Final assistant content, when one exists.
    pub response: Option<String>,
}

/// Which side owns the shared iteration counter for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IterationOwner {
    /// Standalone agent graph: each model step increments.
    Agent,
    /// A coordinator owns the counter; the agent loop leaves it alone.
    Coordinator,
}

/// One thread's checkpoint lane for the duration of a turn.
///
/// Tracks the version across commits so every write carries an exact
/// precondition, giving the at-most-one-writer guarantee end to end.
pub struct CheckpointSession {
    store: Arc<dyn CheckpointStore>,
    thread_id: String,
    version: Option<Version>,
}

impl CheckpointSession {
    /// Open the lane for a thread, returning existing state when present.
    pub async fn open(
        store: Arc<dyn CheckpointStore>,
        thread_id: &str,
    ) -> Result<(Self, Option<AgentState>), CheckpointStoreError> {
        let tuple = store.get_tuple(thread_id).await?;
        let (version, state) = match tuple {
            Some(t) => (Some(t.version), Some(t.state)),
            None => (None, None),
        };
        Ok((
            Self {
                store,
                thread_id: thread_id.to_string(),
                version,
            },
            state,
        ))
    }

    /// Version of the last committed checkpoint, if any.
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Commit a checkpoint at a node boundary.
    pub async fn commit(&mut self, state: &AgentState) -> Result<Version, CheckpointStoreError> {
        let precondition = match self.version {
            Some(v) => VersionPrecondition::Exact(v),
            None => VersionPrecondition::Any,
        };
        let committed = self
            .store
            .put_tuple(&self.thread_id, state, precondition)
            .await?;
        self.version = Some(committed.version);
        Ok(committed.version)
    }
}

/// A compiled single agent.
pub struct Agent {
    id: String,
    description: String,
    model: Arc<dyn ChatModel>,
    system_prompt: String,
    tools: HashMap<String, Arc<dyn Tool>>,
    error_mapper: ErrorMapper,
    window: WindowMemory,
    max_iterations: u32,
    retry: RetryPolicy,
    model_timeout: Duration,
    tool_timeout: Duration,
    interrupt_before: HashSet<String>,
}

impl Agent {
    /// Start building an agent.
    pub fn builder(id: impl Into<String>, model: Arc<dyn ChatModel>) -> AgentBuilder {
        AgentBuilder::new(id, model)
    }

    /// Agent identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// One-line description used in coordinator prompts.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Iteration cap this agent applies to standalone turns.
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Add a tool after construction. Used by the swarm topology to
    /// augment peers with handoff tools.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.descriptor().name, tool);
        self
    }

    fn executor(&self) -> ToolExecutor {
        ToolExecutor::new(self.tools.clone(), self.error_mapper.clone())
            .with_call_timeout(self.tool_timeout)
            .with_interrupt_before(self.interrupt_before.clone())
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Run one standalone turn: load state, append the user message, and
    /// drive the graph to termination.
    pub async fn run(
        &self,
        store: Arc<dyn CheckpointStore>,
        thread_id: &str,
        user_message: impl Into<String>,
    ) -> Result<TurnOutcome, AgentLoopError> {
        let (mut session, state) = CheckpointSession::open(store, thread_id).await?;
        let mut state = state.unwrap_or_else(|| {
            AgentState::new(thread_id).with_max_iterations(self.max_iterations)
        });
        StateDelta::new()
            .with_message(Message::user(user_message))
            .with_iteration_reset()
            .apply_to(&mut state);
        session.commit(&state).await?;

        self.run_loop(&mut session, state, IterationOwner::Agent, None, None, false)
            .await
    }

    /// Resume a suspended or interrupted thread without a new user
    /// message. The pending tool batch runs even if its tools are in the
    /// interrupt set, since the suspension has been approved; calls the
    /// model issues afterwards are interrupted as usual.
    pub async fn resume(
        &self,
        store: Arc<dyn CheckpointStore>,
        thread_id: &str,
    ) -> Result<TurnOutcome, AgentLoopError> {
        let (mut session, state) = CheckpointSession::open(store, thread_id).await?;
        let state = state.ok_or_else(|| {
            AgentLoopError::Checkpoint(CheckpointStoreError::NotFound(thread_id.to_string()))
        })?;
        self.run_loop(&mut session, state, IterationOwner::Agent, None, None, true)
            .await
    }

    /// Run this agent's part of a coordinator turn. The coordinator owns
    /// the shared iteration counter and the checkpoint session.
    pub(crate) async fn run_turn(
        &self,
        session: &mut CheckpointSession,
        state: AgentState,
        events: Option<&EventSink>,
        cancel: Option<&CancellationToken>,
    ) -> Result<TurnOutcome, AgentLoopError> {
        self.run_loop(
            session,
            state,
            IterationOwner::Coordinator,
            events,
            cancel,
            false,
        )
        .await
    }

    async fn run_loop(
        &self,
        session: &mut CheckpointSession,
        mut state: AgentState,
        owner: IterationOwner,
        events: Option<&EventSink>,
        cancel: Option<&CancellationToken>,
        approve_pending: bool,
    ) -> Result<TurnOutcome, AgentLoopError> {
        let mut rounds: u32 = 0;
        let mut approve_next_batch = approve_pending;

        loop {
            if is_cancelled(cancel) {
                return Ok(cancelled(state));
            }

            // Tool node, entered when the trailing assistant message has
            // unanswered calls (fresh from the model step or on resume).
            if let Some(assistant) = state.pending_tool_step().cloned() {
                for call in assistant.calls() {
                    let delivered = emit(
                        events,
                        AgentEvent::ToolCallStart {
                            id: call.id.clone(),
                            name: call.name.clone(),
                        },
                    )
                    .await;
                    if !delivered {
                        return Ok(cancelled(state));
                    }
                }

                let executor = if approve_next_batch {
                    self.executor().with_interrupt_before(HashSet::new())
                } else {
                    self.executor()
                };
                approve_next_batch = false;

                match executor.execute(&assistant).await {
                    ToolBatchOutcome::Suspended(pending) => {
                        tracing::info!(
                            agent = %self.id,
                            pending = pending.len(),
                            "turn suspended before tool execution"
                        );
                        return Ok(TurnOutcome {
                            state,
                            termination: Termination::Suspended,
                            response: None,
                        });
                    }
                    ToolBatchOutcome::Completed(tool_messages) => {
                        for message in &tool_messages {
                            if let Some(id) = &message.tool_call_id {
                                emit(events, AgentEvent::ToolCallDone { id: id.clone() }).await;
                            }
                        }
                        let handoff = handoff_target_in(assistant.calls());
                        let mut delta = StateDelta::new().with_messages(tool_messages);
                        if let Some(target) = &handoff {
                            delta = delta.set_handoff_target(target);
                        }
                        delta.apply_to(&mut state);
                        session.commit(&state).await?;

                        if let Some(target) = handoff {
                            tracing::info!(agent = %self.id, target = %target, "handoff requested, ending turn");
                            let response = state.last_assistant_text().map(str::to_string);
                            return Ok(TurnOutcome {
                                state,
                                termination: Termination::NaturalEnd,
                                response,
                            });
                        }
                        continue;
                    }
                }
            }

            // Cap guard before entering the agent-node.
            let capped = match owner {
                IterationOwner::Agent => state.cap_reached(),
                IterationOwner::Coordinator => rounds >= self.max_iterations,
            };
            if capped {
                let max = match owner {
                    IterationOwner::Agent => state.max_iterations,
                    IterationOwner::Coordinator => self.max_iterations,
                };
                StateDelta::new()
                    .with_message(iteration_cap_message(max))
                    .apply_to(&mut state);
                session.commit(&state).await?;
                let response = state.last_assistant_text().map(str::to_string);
                return Ok(TurnOutcome {
                    state,
                    termination: Termination::CapReached,
                    response,
                });
            }

            // Agent node: window hook, then the model call.
            let input = self.window.apply(&state.messages);
            let mut prompt = Vec::with_capacity(input.len() + 1);
            prompt.push(Message::system(&self.system_prompt));
            prompt.extend(input.iter().cloned());

            let reply = match self.invoke_model(&prompt, events, cancel).await? {
                Some(reply) => reply,
                None => return Ok(cancelled(state)),
            };

            let mut delta = StateDelta::new()
                .with_llm_input(input)
                .with_message(reply.clone());
            if owner == IterationOwner::Agent {
                delta = delta.with_iteration_increment(1);
            }
            delta.apply_to(&mut state);
            session.commit(&state).await?;
            rounds += 1;

            if !reply.requests_tools() {
                let response = Some(reply.content).filter(|c| !c.is_empty());
                return Ok(TurnOutcome {
                    state,
                    termination: Termination::NaturalEnd,
                    response,
                });
            }
        }
    }

    /// Call the model with retry for retryable categories. Returns `None`
    /// on cancellation.
    async fn invoke_model(
        &self,
        prompt: &[Message],
        events: Option<&EventSink>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Message>, AgentLoopError> {
        let descriptors = self.descriptors();
        let mut attempt: u32 = 0;

        loop {
            if is_cancelled(cancel) {
                return Ok(None);
            }

            let result = if events.is_some() {
                self.stream_once(prompt, &descriptors, events).await
            } else {
                match tokio::time::timeout(
                    self.model_timeout,
                    self.model.invoke(prompt, &descriptors),
                )
                .await
                {
                    Ok(Ok(message)) => ModelAttempt::Reply(message),
                    Ok(Err(e)) => ModelAttempt::Failed(e.to_string()),
                    Err(_) => ModelAttempt::Failed(format!(
                        "model call timed out after {:?}",
                        self.model_timeout
                    )),
                }
            };

            let message = match result {
                ModelAttempt::Reply(message) => return Ok(Some(message)),
                ModelAttempt::Cancelled => return Ok(None),
                ModelAttempt::Failed(message) => message,
            };

            let category = classify_model_error(&message);
            if !category.retryable() || attempt >= self.retry.max_retries {
                return Err(AgentLoopError::Llm { category, message });
            }
            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                agent = %self.id,
                category = %category,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying model call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One streaming model attempt, forwarding text deltas to the sink.
    async fn stream_once(
        &self,
        prompt: &[Message],
        descriptors: &[ToolDescriptor],
        events: Option<&EventSink>,
    ) -> ModelAttempt {
        use futures::StreamExt;

        let attempt = async {
            let mut stream = match self.model.stream(prompt, descriptors).await {
                Ok(stream) => stream,
                Err(e) => return ModelAttempt::Failed(e.to_string()),
            };

            let mut text = String::new();
            while let Some(event) = stream.next().await {
                match event {
                    Ok(StreamEvent::TextDelta { delta }) => {
                        text.push_str(&delta);
                        let delivered = emit(
                            events,
                            AgentEvent::TextDelta {
                                agent: self.id.clone(),
                                delta,
                            },
                        )
                        .await;
                        if !delivered {
                            return ModelAttempt::Cancelled;
                        }
                    }
                    Ok(StreamEvent::Completed { message }) => {
                        return ModelAttempt::Reply(message);
                    }
                    Err(ModelError::Cancelled) => return ModelAttempt::Cancelled,
                    Err(e) => return ModelAttempt::Failed(e.to_string()),
                }
            }
            // Stream ended without a terminal event; fall back to the
            // accumulated text.
            ModelAttempt::Reply(Message::assistant(text))
        };

        match tokio::time::timeout(self.model_timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => ModelAttempt::Failed(format!(
                "model stream timed out after {:?}",
                self.model_timeout
            )),
        }
    }
}

enum ModelAttempt {
    Reply(Message),
    Failed(String),
    Cancelled,
}

fn cancelled(state: AgentState) -> TurnOutcome {
    TurnOutcome {
        state,
        termination: Termination::Cancelled,
        response: None,
    }
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(|token| token.is_cancelled())
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    id: String,
    description: String,
    model: Arc<dyn ChatModel>,
    system_prompt: String,
    tools: HashMap<String, Arc<dyn Tool>>,
    error_mapper: ErrorMapper,
    window: Option<WindowMemory>,
    max_iterations: u32,
    retry: RetryPolicy,
    model_timeout: Duration,
    tool_timeout: Duration,
    interrupt_before: HashSet<String>,
}

impl AgentBuilder {
    /// Create a builder for an agent with the given id and model.
    pub fn new(id: impl Into<String>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            model,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tools: HashMap::new(),
            error_mapper: ErrorMapper::default(),
            window: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            retry: RetryPolicy::default(),
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
            interrupt_before: HashSet::new(),
        }
    }

    /// Set the description shown in coordinator prompts.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Replace the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Add one tool.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.descriptor().name, tool);
        self
    }

    /// Bind the current snapshot and error mapper of a registry.
    #[must_use]
    pub fn with_registry(mut self, registry: &crate::registry::ToolRegistry) -> Self {
        self.tools.extend(registry.snapshot());
        self.error_mapper = registry.error_mapper();
        self
    }

    /// Replace the window memory.
    #[must_use]
    pub fn with_window(mut self, window: WindowMemory) -> Self {
        self.window = Some(window);
        self
    }

    /// Set the iteration cap (clamped to at least one).
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Set the retry policy for model calls.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-call model timeout.
    #[must_use]
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Apply an [`crate::config::EngineConfig`]: iteration cap, window
    /// budget, timeouts, interrupt set, retry policy, and prompt suffix.
    #[must_use]
    pub fn with_config(mut self, config: &crate::config::EngineConfig) -> Self {
        self.max_iterations = config.max_iterations.max(1);
        self.window = Some(WindowMemory::with_budget(config.context_max_tokens));
        self.model_timeout = config.model_timeout();
        self.tool_timeout = config.tool_timeout();
        self.interrupt_before = config.interrupt_before_tools.clone();
        self.retry = config.retry.clone();
        let suffix = config.prompt_suffix();
        if !suffix.is_empty() {
            self.system_prompt.push_str(&suffix);
        }
        self
    }

    /// Build the agent.
    pub fn build(self) -> Agent {
        Agent {
            id: self.id,
            description: self.description,
            model: self.model,
            system_prompt: self.system_prompt,
            tools: self.tools,
            error_mapper: self.error_mapper,
            window: self.window.unwrap_or_default(),
            max_iterations: self.max_iterations,
            retry: self.retry,
            model_timeout: self.model_timeout,
            tool_timeout: self.tool_timeout,
            interrupt_before: self.interrupt_before,
        }
    }
}

//! Coordinators: supervisory graphs over multiple single agents.
//!
//! Three topologies share the [`ensemble_contract::AgentState`] type, the
//! bounded-iteration guard, and structured-decision enforcement:
//!
//! - [`RouterCoordinator`]: one-shot dispatch by classifier
//! - [`SupervisorCoordinator`]: iterative manager issuing work to workers
//! - [`SwarmCoordinator`]: peers handing off to each other via tool calls
//!
//! The shared iteration counter increments once per coordinator-to-agent
//! edge and is checked before every edge; on reach, the turn terminates
//! with a deterministic cap-reached assistant message.

mod router;
mod supervisor;
mod swarm;

pub use router::{RouteDecision, RouterCoordinator};
pub use supervisor::{SupervisorCoordinator, SupervisorDecision, SupervisorStatus, DONE_SENTINEL};
pub use swarm::{SwarmBuilder, SwarmCoordinator};

use crate::agent::{
    iteration_cap_message, AgentLoopError, CheckpointSession, Termination, TurnOutcome,
};
use crate::streaming::{emit, AgentEvent, EventSink};
use crate::structured::DecisionError;
use ensemble_contract::{
    AgentState, CheckpointStore, CheckpointStoreError, Message, StateDelta,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Coordinator topology, for logging and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Router,
    Supervisor,
    Swarm,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::Router => f.write_str("router"),
            Topology::Supervisor => f.write_str("supervisor"),
            Topology::Swarm => f.write_str("swarm"),
        }
    }
}

/// Errors that abort a coordinator turn.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Loop(#[from] AgentLoopError),

    #[error(transparent)]
    Store(#[from] CheckpointStoreError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error("no agents registered for topology {0}")]
    NoAgents(Topology),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),
}

/// One inbound user turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub message: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl TurnRequest {
    /// Create a request for a thread.
    pub fn new(thread_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            message: message.into(),
            user_id: None,
            session_id: None,
        }
    }

    /// Attach the caller's user identifier.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the caller's session identifier.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Log one coordinator transition.
pub(crate) fn log_transition(topology: Topology, from: &str, to: &str, iteration: u32) {
    tracing::info!(
        topology = %topology,
        from = %from,
        to = %to,
        iteration,
        "coordinator transition"
    );
}

/// Load or create thread state and commit the inbound user message.
pub(crate) async fn begin_turn(
    store: Arc<dyn CheckpointStore>,
    request: &TurnRequest,
    max_iterations: u32,
) -> Result<(CheckpointSession, AgentState), CoordinatorError> {
    let (mut session, state) = CheckpointSession::open(store, &request.thread_id).await?;
    let mut state = state.unwrap_or_else(|| {
        let mut created =
            AgentState::new(&request.thread_id).with_max_iterations(max_iterations);
        if let Some(user_id) = &request.user_id {
            created = created.with_user_id(user_id);
        }
        if let Some(session_id) = &request.session_id {
            created = created.with_session_id(session_id);
        }
        created
    });

    // A new user turn opens with a fresh coordinator-step budget.
    StateDelta::new()
        .with_message(Message::user(&request.message))
        .with_iteration_reset()
        .apply_to(&mut state);
    session.commit(&state).await?;
    Ok((session, state))
}

/// Terminate a turn at the iteration cap with the deterministic message.
pub(crate) async fn finish_capped(
    session: &mut CheckpointSession,
    mut state: AgentState,
    max_iterations: u32,
) -> Result<TurnOutcome, CoordinatorError> {
    StateDelta::new()
        .with_message(iteration_cap_message(max_iterations))
        .apply_to(&mut state);
    session.commit(&state).await?;
    let response = state.last_assistant_text().map(str::to_string);
    Ok(TurnOutcome {
        state,
        termination: Termination::CapReached,
        response,
    })
}

/// Emit the dispatch event; `false` means the consumer is gone.
pub(crate) async fn emit_dispatch(events: Option<&EventSink>, agent: &str) -> bool {
    emit(
        events,
        AgentEvent::AgentDispatched {
            agent: agent.to_string(),
        },
    )
    .await
}

/// Emit the completion event with the final response.
pub(crate) async fn emit_completed(events: Option<&EventSink>, outcome: &TurnOutcome) {
    let response = outcome.response.clone().unwrap_or_default();
    emit(events, AgentEvent::TurnCompleted { response }).await;
}

/// A coordinator of any topology, for configuration-driven assembly.
pub enum AnyCoordinator {
    Router(RouterCoordinator),
    Supervisor(SupervisorCoordinator),
    Swarm(SwarmCoordinator),
}

impl AnyCoordinator {
    /// The topology of this coordinator.
    pub fn topology(&self) -> Topology {
        match self {
            AnyCoordinator::Router(_) => Topology::Router,
            AnyCoordinator::Supervisor(_) => Topology::Supervisor,
            AnyCoordinator::Swarm(_) => Topology::Swarm,
        }
    }

    /// Run one user turn to termination.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: Option<EventSink>,
        cancel: Option<CancellationToken>,
    ) -> Result<TurnOutcome, CoordinatorError> {
        match self {
            AnyCoordinator::Router(c) => c.run_turn(request, events, cancel).await,
            AnyCoordinator::Supervisor(c) => c.run_turn(request, events, cancel).await,
            AnyCoordinator::Swarm(c) => c.run_turn(request, events, cancel).await,
        }
    }
}

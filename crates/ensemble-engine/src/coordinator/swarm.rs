//! Swarm topology: peer agents handing off to each other via tool calls.

use super::{
    begin_turn, emit_completed, emit_dispatch, finish_capped, log_transition, CoordinatorError,
    Topology, TurnRequest,
};
use crate::agent::{Agent, Termination, TurnOutcome};
use crate::handoff::HandoffTool;
use crate::streaming::EventSink;
use ensemble_contract::{CheckpointStore, StateDelta};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// N peer agents whose tool sets are augmented with `transfer_to_<peer>`
/// tools according to a declared handoff map. After each turn the
/// coordinator reads `handoff_target`: set and valid means dispatch to
/// that peer, empty means terminate. Cycles are permitted; the iteration
/// cap still bounds them.
pub struct SwarmCoordinator {
    peers: HashMap<String, Agent>,
    default_agent: String,
    store: Arc<dyn CheckpointStore>,
    max_iterations: u32,
}

/// Builder for [`SwarmCoordinator`].
pub struct SwarmBuilder {
    peers: Vec<(Agent, Vec<String>)>,
    default_agent: Option<String>,
    store: Arc<dyn CheckpointStore>,
    max_iterations: u32,
}

impl SwarmBuilder {
    /// Add a peer with its declared handoff targets.
    #[must_use]
    pub fn with_agent(
        mut self,
        agent: Agent,
        handoffs: impl IntoIterator<Item = String>,
    ) -> Self {
        self.peers.push((agent, handoffs.into_iter().collect()));
        self
    }

    /// Name the agent that starts a turn when the thread has no recorded
    /// current agent. Defaults to the first registered peer.
    #[must_use]
    pub fn with_default_agent(mut self, name: impl Into<String>) -> Self {
        self.default_agent = Some(name.into());
        self
    }

    /// Set the iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Validate the topology and build the coordinator.
    pub fn build(self) -> Result<SwarmCoordinator, CoordinatorError> {
        let known: Vec<String> = self.peers.iter().map(|(a, _)| a.id().to_string()).collect();
        if known.is_empty() {
            return Err(CoordinatorError::NoAgents(Topology::Swarm));
        }

        let default_agent = match self.default_agent {
            Some(name) => {
                if !known.contains(&name) {
                    return Err(CoordinatorError::UnknownAgent(name));
                }
                name
            }
            None => known[0].clone(),
        };

        let mut peers = HashMap::new();
        for (agent, handoffs) in self.peers {
            let mut agent = agent;
            for target in handoffs {
                if !known.contains(&target) {
                    return Err(CoordinatorError::UnknownAgent(target));
                }
                agent = agent.with_tool(Arc::new(HandoffTool::new(target)));
            }
            peers.insert(agent.id().to_string(), agent);
        }

        Ok(SwarmCoordinator {
            peers,
            default_agent,
            store: self.store,
            max_iterations: self.max_iterations,
        })
    }
}

impl SwarmCoordinator {
    /// Start building a swarm over a checkpoint store.
    pub fn builder(store: Arc<dyn CheckpointStore>) -> SwarmBuilder {
        SwarmBuilder {
            peers: Vec::new(),
            default_agent: None,
            store,
            max_iterations: ensemble_contract::DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Run one swarm turn.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: Option<EventSink>,
        cancel: Option<CancellationToken>,
    ) -> Result<TurnOutcome, CoordinatorError> {
        let (mut session, mut state) =
            begin_turn(self.store.clone(), &request, self.max_iterations).await?;

        // A handoff target left over from a cap-terminated turn is the
        // thread's recorded current agent; otherwise the default starts.
        let mut current = match state.handoff_target.clone() {
            Some(target) if self.peers.contains_key(&target) => target,
            Some(target) => {
                tracing::warn!(target = %target, "recorded handoff target unknown, using default agent");
                self.default_agent.clone()
            }
            None => self.default_agent.clone(),
        };
        let mut previous = "start".to_string();

        loop {
            if cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Ok(TurnOutcome {
                    state,
                    termination: Termination::Cancelled,
                    response: None,
                });
            }

            if state.cap_reached() {
                let max_iterations = state.max_iterations;
                return finish_capped(&mut session, state, max_iterations).await;
            }

            // Dispatch edge: count it and consume the handoff hint in the
            // same delta.
            StateDelta::new()
                .with_iteration_increment(1)
                .clear_handoff_target()
                .apply_to(&mut state);
            session.commit(&state).await?;
            log_transition(Topology::Swarm, &previous, &current, state.iteration_count);

            if !emit_dispatch(events.as_ref(), &current).await {
                return Ok(TurnOutcome {
                    state,
                    termination: Termination::Cancelled,
                    response: None,
                });
            }

            let peer = self
                .peers
                .get(&current)
                .ok_or_else(|| CoordinatorError::UnknownAgent(current.clone()))?;
            let outcome = peer
                .run_turn(&mut session, state, events.as_ref(), cancel.as_ref())
                .await?;
            state = outcome.state;

            match outcome.termination {
                Termination::NaturalEnd => {}
                Termination::CapReached | Termination::Suspended | Termination::Cancelled => {
                    let outcome = TurnOutcome {
                        state,
                        termination: outcome.termination,
                        response: outcome.response,
                    };
                    emit_completed(events.as_ref(), &outcome).await;
                    return Ok(outcome);
                }
            }

            match state.handoff_target.clone() {
                Some(target) if self.peers.contains_key(&target) => {
                    previous = std::mem::replace(&mut current, target);
                }
                Some(target) => {
                    tracing::warn!(target = %target, "handoff to unknown peer, terminating turn");
                    StateDelta::new().clear_handoff_target().apply_to(&mut state);
                    session.commit(&state).await?;
                    let response = state.last_assistant_text().map(str::to_string);
                    let outcome = TurnOutcome {
                        state,
                        termination: Termination::NaturalEnd,
                        response,
                    };
                    emit_completed(events.as_ref(), &outcome).await;
                    return Ok(outcome);
                }
                None => {
                    let response = state.last_assistant_text().map(str::to_string);
                    let outcome = TurnOutcome {
                        state,
                        termination: Termination::NaturalEnd,
                        response,
                    };
                    emit_completed(events.as_ref(), &outcome).await;
                    return Ok(outcome);
                }
            }
        }
    }
}

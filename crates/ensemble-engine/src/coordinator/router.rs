//! Router topology: one-shot dispatch by classifier.

use super::{
    begin_turn, emit_completed, emit_dispatch, finish_capped, log_transition, CoordinatorError,
    Topology, TurnRequest,
};
use crate::agent::{Agent, Termination, TurnOutcome};
use crate::streaming::EventSink;
use crate::structured::decide;
use ensemble_contract::{ChatModel, CheckpointStore, StateDelta};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Structured decision returned by the route node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RouteDecision {
    /// Name of the agent that should handle the request.
    pub agent: String,
    /// Short justification.
    pub reason: String,
    /// Classifier confidence in the range 0 to 1.
    pub confidence: f64,
}

/// One route node and N agent nodes. The route node picks an agent, the
/// chosen agent runs once, and the graph terminates.
pub struct RouterCoordinator {
    model: Arc<dyn ChatModel>,
    agents: Vec<Agent>,
    store: Arc<dyn CheckpointStore>,
    max_iterations: u32,
}

impl RouterCoordinator {
    /// Create a router over a classifier model and a checkpoint store.
    pub fn new(model: Arc<dyn ChatModel>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            model,
            agents: Vec::new(),
            store,
            max_iterations: ensemble_contract::DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Register an agent. Registration order decides the fallback agent.
    #[must_use]
    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    /// Set the iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    fn agent_named(&self, name: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id() == name)
    }

    fn route_task(&self) -> String {
        let roster: Vec<String> = self
            .agents
            .iter()
            .map(|a| {
                if a.description().is_empty() {
                    format!("- {}", a.id())
                } else {
                    format!("- {}: {}", a.id(), a.description())
                }
            })
            .collect();
        format!(
            "You route user requests to exactly one of these agents:\n{}\n\
             Pick the single best agent for the latest user message.",
            roster.join("\n")
        )
    }

    /// Run one routed turn.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: Option<EventSink>,
        cancel: Option<CancellationToken>,
    ) -> Result<TurnOutcome, CoordinatorError> {
        let first = self
            .agents
            .first()
            .ok_or(CoordinatorError::NoAgents(Topology::Router))?;

        let (mut session, mut state) =
            begin_turn(self.store.clone(), &request, self.max_iterations).await?;

        // Route node. The decision itself counts as one coordinator step.
        if state.cap_reached() {
            let max_iterations = state.max_iterations;
            return finish_capped(&mut session, state, max_iterations).await;
        }

        let chosen = match decide::<RouteDecision>(
            self.model.as_ref(),
            &self.route_task(),
            &state.messages,
        )
        .await
        {
            Ok(decision) => {
                if self.agent_named(&decision.agent).is_some() {
                    tracing::debug!(
                        agent = %decision.agent,
                        confidence = decision.confidence,
                        reason = %decision.reason,
                        "route decision"
                    );
                    decision.agent
                } else {
                    tracing::warn!(
                        returned = %decision.agent,
                        fallback = %first.id(),
                        "router returned unknown agent, falling back to first registered"
                    );
                    first.id().to_string()
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, fallback = %first.id(), "route decision failed, falling back");
                first.id().to_string()
            }
        };

        StateDelta::new()
            .with_iteration_increment(1)
            .set_next_agent(&chosen)
            .apply_to(&mut state);
        session.commit(&state).await?;
        log_transition(Topology::Router, "route", &chosen, state.iteration_count);

        // Dispatch edge: consume the hint in the same delta that counts
        // the edge, so a resume never re-fires it.
        if state.cap_reached() {
            let max_iterations = state.max_iterations;
            return finish_capped(&mut session, state, max_iterations).await;
        }
        StateDelta::new()
            .with_iteration_increment(1)
            .clear_next_agent()
            .apply_to(&mut state);
        session.commit(&state).await?;

        if !emit_dispatch(events.as_ref(), &chosen).await {
            return Ok(TurnOutcome {
                state,
                termination: Termination::Cancelled,
                response: None,
            });
        }

        let agent = self
            .agent_named(&chosen)
            .ok_or_else(|| CoordinatorError::UnknownAgent(chosen.clone()))?;
        let outcome = agent
            .run_turn(&mut session, state, events.as_ref(), cancel.as_ref())
            .await?;

        emit_completed(events.as_ref(), &outcome).await;
        Ok(outcome)
    }
}

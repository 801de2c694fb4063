//! Supervisor topology: an iterative manager issuing work to workers.

use super::{
    begin_turn, emit_completed, emit_dispatch, finish_capped, log_transition, CoordinatorError,
    Topology, TurnRequest,
};
use crate::agent::{Agent, Termination, TurnOutcome};
use crate::streaming::EventSink;
use crate::structured::decide;
use ensemble_contract::{ChatModel, CheckpointStore, Message, StateDelta};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sentinel worker name that terminates the loop.
pub const DONE_SENTINEL: &str = "__done__";

/// Structured decision returned by the supervise node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SupervisorDecision {
    /// Worker to run next, or `__done__` to finish.
    pub next: String,
    /// Whether the task is still in progress.
    pub status: SupervisorStatus,
    /// Instruction for the worker, or the closing summary when done.
    pub message: String,
}

/// Progress status reported by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorStatus {
    Working,
    Complete,
}

/// One supervise node and N worker nodes, looping until the supervisor
/// says done or the iteration cap fires.
pub struct SupervisorCoordinator {
    model: Arc<dyn ChatModel>,
    workers: Vec<Agent>,
    store: Arc<dyn CheckpointStore>,
    max_iterations: u32,
}

impl SupervisorCoordinator {
    /// Create a supervisor over a manager model and a checkpoint store.
    pub fn new(model: Arc<dyn ChatModel>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            model,
            workers: Vec::new(),
            store,
            max_iterations: ensemble_contract::DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Register a worker.
    #[must_use]
    pub fn with_worker(mut self, worker: Agent) -> Self {
        self.workers.push(worker);
        self
    }

    /// Set the iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    fn worker_named(&self, name: &str) -> Option<&Agent> {
        self.workers.iter().find(|w| w.id() == name)
    }

    fn supervise_task(&self) -> String {
        let roster: Vec<String> = self
            .workers
            .iter()
            .map(|w| {
                if w.description().is_empty() {
                    format!("- {}", w.id())
                } else {
                    format!("- {}: {}", w.id(), w.description())
                }
            })
            .collect();
        format!(
            "You supervise these workers:\n{}\n\
             Decide which worker should act next on the conversation so far. \
             When the task is finished, answer with next = \"{DONE_SENTINEL}\" \
             and a closing message.",
            roster.join("\n")
        )
    }

    /// Run one supervised turn.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: Option<EventSink>,
        cancel: Option<CancellationToken>,
    ) -> Result<TurnOutcome, CoordinatorError> {
        if self.workers.is_empty() {
            return Err(CoordinatorError::NoAgents(Topology::Supervisor));
        }

        let (mut session, mut state) =
            begin_turn(self.store.clone(), &request, self.max_iterations).await?;

        loop {
            if cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Ok(TurnOutcome {
                    state,
                    termination: Termination::Cancelled,
                    response: None,
                });
            }

            // Guard the next coordinator-to-worker edge.
            if state.cap_reached() {
                let max_iterations = state.max_iterations;
                return finish_capped(&mut session, state, max_iterations).await;
            }

            let decision = match decide::<SupervisorDecision>(
                self.model.as_ref(),
                &self.supervise_task(),
                &state.messages,
            )
            .await
            {
                Ok(decision) => decision,
                Err(e) => {
                    // Parse fallback for this topology is done.
                    tracing::warn!(error = %e, "supervisor decision failed, terminating turn");
                    SupervisorDecision {
                        next: DONE_SENTINEL.to_string(),
                        status: SupervisorStatus::Complete,
                        message: String::new(),
                    }
                }
            };

            if decision.next == DONE_SENTINEL {
                log_transition(
                    Topology::Supervisor,
                    "supervise",
                    DONE_SENTINEL,
                    state.iteration_count,
                );
                if !decision.message.is_empty() {
                    StateDelta::new()
                        .with_message(Message::assistant(&decision.message))
                        .apply_to(&mut state);
                    session.commit(&state).await?;
                }
                let response = state.last_assistant_text().map(str::to_string);
                let outcome = TurnOutcome {
                    state,
                    termination: Termination::NaturalEnd,
                    response,
                };
                emit_completed(events.as_ref(), &outcome).await;
                return Ok(outcome);
            }

            let Some(worker) = self.worker_named(&decision.next) else {
                // Tie-break for an out-of-set worker name: terminate with
                // a diagnostic assistant message.
                tracing::warn!(worker = %decision.next, "supervisor chose unknown worker, terminating");
                StateDelta::new()
                    .with_message(Message::assistant(format!(
                        "Supervision stopped: '{}' is not a known worker.",
                        decision.next
                    )))
                    .apply_to(&mut state);
                session.commit(&state).await?;
                let response = state.last_assistant_text().map(str::to_string);
                let outcome = TurnOutcome {
                    state,
                    termination: Termination::NaturalEnd,
                    response,
                };
                emit_completed(events.as_ref(), &outcome).await;
                return Ok(outcome);
            };

            // Record the choice, then consume it on the dispatch edge.
            StateDelta::new().set_next_worker(worker.id()).apply_to(&mut state);
            session.commit(&state).await?;

            let mut dispatch = StateDelta::new()
                .with_iteration_increment(1)
                .clear_next_worker();
            if !decision.message.is_empty() {
                dispatch = dispatch.with_message(Message::user(format!(
                    "[supervisor to {}] {}",
                    worker.id(),
                    decision.message
                )));
            }
            dispatch.apply_to(&mut state);
            session.commit(&state).await?;
            log_transition(
                Topology::Supervisor,
                "supervise",
                worker.id(),
                state.iteration_count,
            );

            if !emit_dispatch(events.as_ref(), worker.id()).await {
                return Ok(TurnOutcome {
                    state,
                    termination: Termination::Cancelled,
                    response: None,
                });
            }

            let outcome = worker
                .run_turn(&mut session, state, events.as_ref(), cancel.as_ref())
                .await?;
            state = outcome.state;

            match outcome.termination {
                Termination::NaturalEnd => {}
                Termination::CapReached | Termination::Suspended | Termination::Cancelled => {
                    // The worker ended the turn for us.
                    let outcome = TurnOutcome {
                        state,
                        termination: outcome.termination,
                        response: outcome.response,
                    };
                    emit_completed(events.as_ref(), &outcome).await;
                    return Ok(outcome);
                }
            }
        }
    }
}

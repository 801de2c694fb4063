//! Single-agent loop behaviour: tool rounds, caps, checkpoints, resume,
//! error absorption, retry, and cancellation.

use async_trait::async_trait;
use ensemble_contract::testing::{FailingModel, ScriptedModel};
use ensemble_contract::{
    CheckpointStore, Message, RetryPolicy, Role, StateDelta, Tool, ToolCall, ToolDescriptor,
    ToolError, ToolResult, VersionPrecondition,
};
use ensemble_engine::{Agent, AgentLoopError, EngineConfig, Termination};
use ensemble_store_adapters::MemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("echo", "Echo the text argument")
    }
    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::success("echo", args["text"].clone()))
    }
}

struct ValidatingTool;

#[async_trait]
impl Tool for ValidatingTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new("lookup", "Looks up a record")
    }
    async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::InvalidArguments(
            "record id must be numeric".to_string(),
        ))
    }
}

#[tokio::test]
async fn model_tool_model_round_completes() {
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());
    let model = ScriptedModel::new([
        ScriptedModel::tool_call_reply(
            "Let me check.",
            vec![ToolCall::new("c1", "echo", json!({"text": "pong"}))],
        ),
        Message::assistant("The echo said pong."),
    ]);
    let agent = Agent::builder("solo", Arc::new(model))
        .with_tool(Arc::new(EchoTool))
        .build();

    let outcome = agent.run(store.clone(), "t-loop", "ping").await.unwrap();

    assert_eq!(outcome.termination, Termination::NaturalEnd);
    assert_eq!(outcome.response.as_deref(), Some("The echo said pong."));

    let messages = &outcome.state.messages;
    assert_eq!(
        messages.iter().map(|m| m.role).collect::<Vec<_>>(),
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );

    // Every tool message answers a preceding assistant call with the same
    // id, and the pair is consecutive.
    let tool_msg = &messages[2];
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(messages[1].calls()[0].id, "c1");
    assert_eq!(tool_msg.content, "pong");

    // Standalone model steps increment the counter.
    assert_eq!(outcome.state.iteration_count, 2);
}

#[tokio::test]
async fn checkpoints_written_at_every_node_boundary() {
    let store = Arc::new(MemoryStore::new());
    let model = ScriptedModel::new([
        ScriptedModel::tool_call_reply("", vec![ToolCall::new("c1", "echo", json!({"text": "x"}))]),
        Message::assistant("done"),
    ]);
    let agent = Agent::builder("solo", Arc::new(model))
        .with_tool(Arc::new(EchoTool))
        .build();

    let generic: Arc<dyn CheckpointStore> = store.clone();
    agent.run(generic, "t-ckpt", "go").await.unwrap();

    // user append, assistant step, tool step, final assistant step.
    let tuple = store.get_tuple("t-ckpt").await.unwrap().unwrap();
    assert_eq!(tuple.version, 4);
    assert_eq!(tuple.parent_version, Some(3));
    assert_eq!(tuple.state.messages.len(), 4);
}

#[tokio::test]
async fn iteration_cap_appends_deterministic_message() {
    // The model asks for tools forever; the cap stops the loop.
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());
    let model = ScriptedModel::looping([ScriptedModel::tool_call_reply(
        "again",
        vec![ToolCall::new("c1", "echo", json!({"text": "loop"}))],
    )]);
    let agent = Agent::builder("looper", Arc::new(model))
        .with_tool(Arc::new(EchoTool))
        .with_max_iterations(3)
        .build();

    let outcome = agent.run(store, "t-cap", "never stop").await.unwrap();

    assert_eq!(outcome.termination, Termination::CapReached);
    assert_eq!(outcome.state.iteration_count, 3);
    assert!(outcome.state.iteration_count <= outcome.state.max_iterations);
    let last = outcome.state.last_message().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert!(last.content.contains("maximum of 3 iterations"));
}

#[tokio::test]
async fn tool_error_is_absorbed_and_agent_recovers() {
    // A raising tool becomes tool-message content; the next model
    // step completes normally and references the failure.
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());
    let model = ScriptedModel::new([
        ScriptedModel::tool_call_reply(
            "Looking it up.",
            vec![ToolCall::new("c1", "lookup", json!({"id": "abc"}))],
        ),
        Message::assistant("The lookup failed because the id was not numeric."),
    ]);
    let agent = Agent::builder("clerk", Arc::new(model))
        .with_tool(Arc::new(ValidatingTool))
        .build();

    let outcome = agent.run(store, "t-flaky", "find record abc").await.unwrap();

    assert_eq!(outcome.termination, Termination::NaturalEnd);
    let tool_msg = outcome
        .state
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool_msg.content.contains("validation"));
    assert_eq!(
        outcome.response.as_deref(),
        Some("The lookup failed because the id was not numeric.")
    );
}

#[tokio::test]
async fn retryable_model_errors_retry_then_surface() {
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());
    let model = Arc::new(FailingModel::new("429 too many requests"));
    let agent = Agent::builder("limited", model.clone())
        .with_retry_policy(RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 1,
            factor: 2,
            max_delay_ms: 5,
        })
        .build();

    let err = agent.run(store, "t-retry", "hi").await.unwrap_err();
    match err {
        AgentLoopError::Llm { category, .. } => {
            assert_eq!(category, ensemble_contract::ErrorCategory::RateLimit);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Initial call plus two retries.
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn non_retryable_model_errors_fail_fast() {
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());
    let model = Arc::new(FailingModel::new("401 unauthorized"));
    let agent = Agent::builder("denied", model.clone())
        .with_retry_policy(RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 1,
            factor: 2,
            max_delay_ms: 5,
        })
        .build();

    let err = agent.run(store, "t-auth", "hi").await.unwrap_err();
    assert!(matches!(err, AgentLoopError::Llm { .. }));
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn interrupt_listed_tool_suspends_then_resume_completes() {
    let store = Arc::new(MemoryStore::new());
    let model = ScriptedModel::new([
        ScriptedModel::tool_call_reply(
            "Executing the sensitive step.",
            vec![ToolCall::new("c1", "echo", json!({"text": "approved"}))],
        ),
        Message::assistant("All done after approval."),
    ]);
    let config = EngineConfig {
        interrupt_before_tools: ["echo".to_string()].into_iter().collect(),
        ..EngineConfig::default()
    };
    let agent = Agent::builder("careful", Arc::new(model))
        .with_config(&config)
        .with_tool(Arc::new(EchoTool))
        .build();

    let generic: Arc<dyn CheckpointStore> = store.clone();
    let outcome = agent.run(generic.clone(), "t-hitl", "do it").await.unwrap();
    assert_eq!(outcome.termination, Termination::Suspended);

    // The suspended state persisted at the model-step boundary: the
    // assistant message with unanswered calls is the checkpoint head.
    let tuple = store.get_tuple("t-hitl").await.unwrap().unwrap();
    assert!(tuple.state.pending_tool_step().is_some());

    // Resume executes the approved batch and finishes the turn.
    let resumed = agent.resume(generic, "t-hitl").await.unwrap();
    assert_eq!(resumed.termination, Termination::NaturalEnd);
    assert_eq!(resumed.response.as_deref(), Some("All done after approval."));
    let roles: Vec<Role> = resumed.state.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
}

#[tokio::test]
async fn resume_after_crash_reexecutes_pending_tool_batch() {
    // Seed a thread whose checkpoint ends mid-graph, as a crash between
    // the model step and the tool step would leave it.
    let store = Arc::new(MemoryStore::new());
    let mut state = ensemble_contract::AgentState::new("t-resume");
    StateDelta::new()
        .with_message(Message::user("run the echo"))
        .with_message(Message::assistant_with_tool_calls(
            "Running.",
            vec![ToolCall::new("c9", "echo", json!({"text": "replayed"}))],
        ))
        .apply_to(&mut state);
    store
        .put_tuple("t-resume", &state, VersionPrecondition::Any)
        .await
        .unwrap();

    let model = ScriptedModel::new([Message::assistant("Echo replayed fine.")]);
    let agent = Agent::builder("recoverer", Arc::new(model))
        .with_tool(Arc::new(EchoTool))
        .build();

    let generic: Arc<dyn CheckpointStore> = store.clone();
    let outcome = agent.resume(generic, "t-resume").await.unwrap();

    assert_eq!(outcome.termination, Termination::NaturalEnd);
    let tool_msg = outcome
        .state
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c9"));
    assert_eq!(tool_msg.content, "replayed");
}

#[tokio::test]
async fn cancelled_turn_keeps_last_committed_checkpoint() {
    let store = Arc::new(MemoryStore::new());
    let model = ScriptedModel::single("should never be called");
    let agent = Agent::builder("cancelled", Arc::new(model)).build();

    // Seed one committed turn so there is an authoritative checkpoint.
    let generic: Arc<dyn CheckpointStore> = store.clone();
    agent.run(generic.clone(), "t-cancel", "hello").await.unwrap();
    let before = store.get_tuple("t-cancel").await.unwrap().unwrap().version;

    // A pre-cancelled token stops the next turn at the first suspension
    // point, after the user-message commit.
    let token = CancellationToken::new();
    token.cancel();
    let swarm = ensemble_engine::SwarmCoordinator::builder(generic.clone())
        .with_agent(
            Agent::builder("cancelled", Arc::new(ScriptedModel::single("nope"))).build(),
            vec![],
        )
        .build()
        .unwrap();
    let outcome = swarm
        .run_turn(
            ensemble_engine::TurnRequest::new("t-cancel", "second message"),
            None,
            Some(token),
        )
        .await
        .unwrap();

    assert_eq!(outcome.termination, Termination::Cancelled);
    let after = store.get_tuple("t-cancel").await.unwrap().unwrap();
    // Only the user-message commit landed; no model or tool step ran.
    assert_eq!(after.version, before + 1);
    assert_eq!(after.state.last_message().unwrap().role, Role::User);
}

#[tokio::test]
async fn second_turn_starts_with_fresh_iteration_budget() {
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());
    let model = ScriptedModel::new([
        Message::assistant("first answer"),
        Message::assistant("second answer"),
    ]);
    let agent = Agent::builder("threaded", Arc::new(model))
        .with_max_iterations(1)
        .build();

    let first = agent.run(store.clone(), "t-multi", "one").await.unwrap();
    assert_eq!(first.termination, Termination::NaturalEnd);
    assert_eq!(first.state.iteration_count, 1);

    // Without a per-turn reset this second turn would cap immediately.
    let second = agent.run(store, "t-multi", "two").await.unwrap();
    assert_eq!(second.termination, Termination::NaturalEnd);
    assert_eq!(second.response.as_deref(), Some("second answer"));
    assert_eq!(second.state.iteration_count, 1);
    assert_eq!(second.state.messages.len(), 4);
}

#[tokio::test]
async fn empty_tool_map_means_plain_conversation() {
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryStore::new());
    let model = ScriptedModel::single("Just chatting.");
    let agent = Agent::builder("plain", Arc::new(model)).build();

    let outcome = agent.run(store, "t-plain", "hello there").await.unwrap();
    assert_eq!(outcome.termination, Termination::NaturalEnd);
    assert_eq!(outcome.state.iteration_count, 1);
    assert_eq!(outcome.response.as_deref(), Some("Just chatting."));
}

//! The ensemble coordination engine.
//!
//! The engine turns one user message into one completed turn: it loads
//! per-thread state from a checkpoint store, appends the user message,
//! repeatedly selects an agent (router, supervisor, or swarm topology)
//! and runs its model/tool loop, and terminates when the topology is done
//! or the iteration cap fires. Every node boundary is checkpointed.

pub mod agent;
pub mod config;
pub mod convert;
pub mod coordinator;
pub mod executor;
pub mod genai_model;
pub mod handoff;
pub mod registry;
pub mod streaming;
pub mod structured;
pub mod window;

pub use agent::{
    iteration_cap_message, Agent, AgentBuilder, AgentLoopError, CheckpointSession, Termination,
    TurnOutcome,
};
pub use config::EngineConfig;
pub use coordinator::{
    AnyCoordinator, CoordinatorError, RouterCoordinator, SupervisorCoordinator, SwarmBuilder,
    SwarmCoordinator, Topology, TurnRequest,
};
pub use executor::{ToolBatchOutcome, ToolExecutor};
pub use genai_model::GenaiChatModel;
pub use registry::ToolRegistry;
pub use streaming::{AgentEvent, EventSink};
pub use window::{
    trim_messages, CharBudgetCounter, TokenCounter, TrimStrategy, WindowConfig, WindowMemory,
};

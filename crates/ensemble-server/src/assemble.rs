//! Configuration-driven coordinator assembly.

use crate::tools::{EchoTool, ServerTimeTool};
use ensemble_contract::{ChatModel, CheckpointStore, ErrorMapper, ReportingMode};
use ensemble_engine::{
    Agent, AnyCoordinator, CoordinatorError, EngineConfig, GenaiChatModel, RouterCoordinator,
    SupervisorCoordinator, SwarmCoordinator, ToolRegistry,
};
use serde::Deserialize;
use std::sync::Arc;

/// Model used when an agent or coordinator does not name one.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Topology selector in the config file.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TopologyConfig {
    Router,
    Supervisor,
    Swarm,
}

/// One agent entry in the config file.
#[derive(Debug, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    /// Names of registry tools to bind to this agent.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Swarm handoff targets.
    #[serde(default)]
    pub handoffs: Vec<String>,
}

/// Server configuration file.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub topology: TopologyConfig,
    /// Model backing the route/supervise node.
    pub coordinator_model: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
    pub agents: Vec<AgentSpec>,
    /// Swarm default agent; first agent when absent.
    pub default_agent: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            topology: TopologyConfig::Swarm,
            coordinator_model: None,
            engine: EngineConfig::default(),
            agents: vec![AgentSpec {
                id: "default".to_string(),
                description: String::new(),
                model: None,
                system_prompt: String::new(),
                tools: vec!["echo".to_string(), "server_time".to_string()],
                handoffs: Vec::new(),
            }],
            default_agent: None,
        }
    }
}

/// Build the registry of tools agents may reference by name.
pub fn builtin_registry(dev_errors: bool) -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));
    registry.register(Arc::new(ServerTimeTool));
    let mode = if dev_errors {
        ReportingMode::Development
    } else {
        ReportingMode::Production
    };
    registry.set_error_mapper(ErrorMapper::new(mode));
    registry
}

fn build_agent(spec: &AgentSpec, config: &EngineConfig, registry: &ToolRegistry) -> Agent {
    let model: Arc<dyn ChatModel> = Arc::new(GenaiChatModel::new(
        spec.model.as_deref().unwrap_or(DEFAULT_MODEL),
    ));
    let mut builder = Agent::builder(&spec.id, model)
        .with_description(&spec.description)
        .with_config(config);
    if !spec.system_prompt.is_empty() {
        builder = builder.with_system_prompt(&spec.system_prompt);
    }
    for name in &spec.tools {
        match registry.get(name) {
            Some(tool) => builder = builder.with_tool(tool),
            None => {
                tracing::warn!(agent = %spec.id, tool = %name, "configured tool not in registry, skipping")
            }
        }
    }
    builder.build()
}

/// Assemble the configured coordinator over a checkpoint store.
pub fn build_coordinator(
    config: &ServerConfig,
    store: Arc<dyn CheckpointStore>,
    registry: &ToolRegistry,
) -> Result<AnyCoordinator, CoordinatorError> {
    let coordinator_model: Arc<dyn ChatModel> = Arc::new(GenaiChatModel::new(
        config.coordinator_model.as_deref().unwrap_or(DEFAULT_MODEL),
    ));
    let max_iterations = config.engine.max_iterations;

    match config.topology {
        TopologyConfig::Router => {
            let mut router = RouterCoordinator::new(coordinator_model, store)
                .with_max_iterations(max_iterations);
            for spec in &config.agents {
                router = router.with_agent(build_agent(spec, &config.engine, registry));
            }
            Ok(AnyCoordinator::Router(router))
        }
        TopologyConfig::Supervisor => {
            let mut supervisor = SupervisorCoordinator::new(coordinator_model, store)
                .with_max_iterations(max_iterations);
            for spec in &config.agents {
                supervisor = supervisor.with_worker(build_agent(spec, &config.engine, registry));
            }
            Ok(AnyCoordinator::Supervisor(supervisor))
        }
        TopologyConfig::Swarm => {
            let mut builder =
                SwarmCoordinator::builder(store).with_max_iterations(max_iterations);
            for spec in &config.agents {
                builder = builder.with_agent(
                    build_agent(spec, &config.engine, registry),
                    spec.handoffs.clone(),
                );
            }
            if let Some(default_agent) = &config.default_agent {
                builder = builder.with_default_agent(default_agent);
            }
            Ok(AnyCoordinator::Swarm(builder.build()?))
        }
    }
}

//! Engine configuration.

use ensemble_contract::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Configuration recognised by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cap on coordinator loops.
    pub max_iterations: u32,
    /// Cap on plan expansion when a planner is present. Reserved; no
    /// planner ships yet but the key is accepted.
    pub max_step_num: u32,
    /// Tool names that force a suspension before execution.
    pub interrupt_before_tools: HashSet<String>,
    /// When true, agents may ask a clarification question instead of
    /// calling tools.
    pub enable_clarification: bool,
    /// Language hint for generated assistant prose.
    pub locale: Option<String>,
    /// Token budget for the window memory.
    pub context_max_tokens: usize,
    /// Checkpoint backend selection string: `memory`, `file:<dir>`,
    /// `postgres:<url>`.
    pub checkpoint_backend: String,
    /// Per-call model timeout in seconds.
    pub model_timeout_secs: u64,
    /// Per-call tool timeout in seconds.
    pub tool_timeout_secs: u64,
    /// Retry policy for retryable model errors.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_step_num: 10,
            interrupt_before_tools: HashSet::new(),
            enable_clarification: false,
            locale: None,
            context_max_tokens: 8_192,
            checkpoint_backend: "memory".to_string(),
            model_timeout_secs: 120,
            tool_timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Per-call model timeout.
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    /// Per-call tool timeout.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Deterministic system-prompt suffix derived from configuration.
    pub fn prompt_suffix(&self) -> String {
        let mut suffix = String::new();
        if self.enable_clarification {
            suffix.push_str(
                "\nIf the request is ambiguous, ask one short clarification question \
                 instead of calling tools.",
            );
        }
        if let Some(locale) = &self.locale {
            suffix.push_str(&format!("\nRespond in the '{locale}' locale."));
        }
        suffix
    }
}

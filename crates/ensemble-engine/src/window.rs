//! Window memory: the token-budgeted pre-model hook.
//!
//! Keeps the prompt below a token budget while preserving conversational
//! validity. The trim is pure and idempotent for a given budget and
//! counter; the stateful [`WindowMemory`] wrapper adds observability
//! counters and writes its output into the state's transient `llm_input`
//! channel rather than mutating `messages`.

use ensemble_contract::{Message, Role};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Deterministic, additive message-to-token estimator.
pub trait TokenCounter: Send + Sync {
    /// Token estimate for one message.
    fn count(&self, message: &Message) -> usize;

    /// Token estimate for a sequence.
    fn count_all(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count(m)).sum()
    }
}

/// Character-based token estimate: ceil(chars / 4) plus a fixed
/// per-message overhead. Exact counting is not required for budget
/// enforcement.
#[derive(Debug, Clone)]
pub struct CharBudgetCounter {
    chars_per_token: usize,
    per_message_overhead: usize,
}

impl Default for CharBudgetCounter {
    fn default() -> Self {
        Self {
            chars_per_token: 4,
            per_message_overhead: 3,
        }
    }
}

impl TokenCounter for CharBudgetCounter {
    fn count(&self, message: &Message) -> usize {
        let mut chars = message.content.chars().count();
        for call in message.calls() {
            chars += call.name.len() + call.arguments.to_string().len();
        }
        chars.div_ceil(self.chars_per_token) + self.per_message_overhead
    }
}

/// Trim direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimStrategy {
    /// Keep the most recent messages, removing from the head.
    KeepLast,
    /// Keep the earliest messages, removing from the tail.
    KeepFirst,
}

/// Window configuration.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Token budget for the model input.
    pub max_tokens: usize,
    pub strategy: TrimStrategy,
    /// Roles the window may start on. Enforced under `KeepLast`, where
    /// trimming disturbs the head.
    pub start_on: Vec<Role>,
    /// Roles the window may end on. Enforced under `KeepFirst`, where
    /// trimming disturbs the tail.
    pub end_on: Vec<Role>,
    /// Re-prepend a leading system message lost to trimming.
    pub preserve_system: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8_192,
            strategy: TrimStrategy::KeepLast,
            start_on: vec![Role::User],
            end_on: vec![Role::User, Role::Tool],
            preserve_system: true,
        }
    }
}

impl WindowConfig {
    /// Set the token budget.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the trim strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: TrimStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Trim `messages` to fit the budget.
///
/// Fail-open: if the configuration cannot produce a valid window (for
/// example an empty boundary set), the input is returned unchanged and
/// the model call is left to fail on its own terms.
pub fn trim_messages(
    messages: &[Message],
    config: &WindowConfig,
    counter: &dyn TokenCounter,
) -> Vec<Message> {
    match trim_inner(messages, config, counter) {
        Some((window, _removed)) => window,
        None => messages.to_vec(),
    }
}

/// Core trim. Returns the window and the number of tokens removed, or
/// `None` when the configuration is unusable.
fn trim_inner(
    messages: &[Message],
    config: &WindowConfig,
    counter: &dyn TokenCounter,
) -> Option<(Vec<Message>, usize)> {
    let total = counter.count_all(messages);
    if total <= config.max_tokens {
        return Some((messages.to_vec(), 0));
    }

    let boundary = match config.strategy {
        TrimStrategy::KeepLast => &config.start_on,
        TrimStrategy::KeepFirst => &config.end_on,
    };
    if boundary.is_empty() {
        return None;
    }

    let leading_system = messages
        .first()
        .filter(|m| m.role == Role::System)
        .filter(|_| config.preserve_system);

    // The preserved system message consumes budget up front so the final
    // window never exceeds the cap.
    let reserved = leading_system.map(|m| counter.count(m)).unwrap_or(0);
    let budget = config.max_tokens.saturating_sub(reserved);

    let window: Vec<Message> = match config.strategy {
        TrimStrategy::KeepLast => {
            let mut start = messages.len();
            let mut used = 0usize;
            while start > 0 {
                let next = counter.count(&messages[start - 1]);
                if used + next > budget {
                    break;
                }
                used += next;
                start -= 1;
            }
            let mut window = &messages[start..];
            // Enforce the start boundary on the trimmed edge.
            while let Some(first) = window.first() {
                if boundary.contains(&first.role) {
                    break;
                }
                window = &window[1..];
            }
            window.to_vec()
        }
        TrimStrategy::KeepFirst => {
            let mut end = 0usize;
            let mut used = 0usize;
            while end < messages.len() {
                let next = counter.count(&messages[end]);
                if used + next > config.max_tokens {
                    break;
                }
                used += next;
                end += 1;
            }
            let mut window = &messages[..end];
            // Enforce the end boundary on the trimmed edge, but keep a
            // sole leading system message out of the check.
            while let Some(last) = window.last() {
                if boundary.contains(&last.role) {
                    break;
                }
                if window.len() == 1 && last.role == Role::System {
                    break;
                }
                window = &window[..window.len() - 1];
            }
            window.to_vec()
        }
    };

    let mut result = Vec::with_capacity(window.len() + 1);
    if let Some(system) = leading_system {
        let retained_system = window.first().is_some_and(|m| m.role == Role::System);
        if !retained_system {
            result.push(system.clone());
        }
    }
    result.extend(window);

    let removed = total.saturating_sub(counter.count_all(&result));
    Some((result, removed))
}

/// Observability counters accumulated by [`WindowMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub total_trims: u64,
    pub total_tokens_removed: u64,
}

/// Stateful pre-model hook: configuration, counter, and trim statistics.
pub struct WindowMemory {
    config: WindowConfig,
    counter: Arc<dyn TokenCounter>,
    total_trims: AtomicU64,
    total_tokens_removed: AtomicU64,
}

impl Default for WindowMemory {
    fn default() -> Self {
        Self::new(WindowConfig::default(), Arc::new(CharBudgetCounter::default()))
    }
}

impl WindowMemory {
    /// Create a window memory over a config and counter.
    pub fn new(config: WindowConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            config,
            counter,
            total_trims: AtomicU64::new(0),
            total_tokens_removed: AtomicU64::new(0),
        }
    }

    /// Window memory with the default counter and the given budget.
    pub fn with_budget(max_tokens: usize) -> Self {
        Self::new(
            WindowConfig::default().with_max_tokens(max_tokens),
            Arc::new(CharBudgetCounter::default()),
        )
    }

    /// Apply the hook, returning the model input window.
    pub fn apply(&self, messages: &[Message]) -> Vec<Message> {
        match trim_inner(messages, &self.config, self.counter.as_ref()) {
            Some((window, removed)) => {
                if removed > 0 {
                    self.total_trims.fetch_add(1, Ordering::Relaxed);
                    self.total_tokens_removed
                        .fetch_add(removed as u64, Ordering::Relaxed);
                    tracing::debug!(
                        removed_tokens = removed,
                        window_len = window.len(),
                        "window memory trimmed model input"
                    );
                }
                window
            }
            None => messages.to_vec(),
        }
    }

    /// Accumulated trim statistics.
    pub fn stats(&self) -> WindowStats {
        WindowStats {
            total_trims: self.total_trims.load(Ordering::Relaxed),
            total_tokens_removed: self.total_tokens_removed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counter that charges ten tokens per message regardless of content.
    struct FlatCounter;

    impl TokenCounter for FlatCounter {
        fn count(&self, _message: &Message) -> usize {
            10
        }
    }

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("You are helpful."),
            Message::user("u1"),
            Message::assistant("a1"),
            Message::tool("c1", "t1"),
            Message::assistant("a2"),
            Message::user("u2"),
            Message::assistant("a3"),
        ]
    }

    #[test]
    fn under_budget_returns_unchanged() {
        let config = WindowConfig::default().with_max_tokens(1_000);
        let messages = conversation();
        let out = trim_messages(&messages, &config, &FlatCounter);
        assert_eq!(out.len(), messages.len());
    }

    #[test]
    fn keep_last_trims_to_boundary_and_preserves_system() {
        // Budget 50; system reserves 10, so the suffix budget is 40:
        // the last four messages fit. The window then advances to the
        // first user message, yielding system + u2 + a3.
        let config = WindowConfig::default().with_max_tokens(50);
        let messages = conversation();
        let out = trim_messages(&messages, &config, &FlatCounter);

        let roles: Vec<Role> = out.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(out[1].content, "u2");
        assert_eq!(out[2].content, "a3");
        assert!(FlatCounter.count_all(&out) <= 50);
    }

    #[test]
    fn keep_last_without_system_message() {
        let messages = vec![
            Message::user("u1"),
            Message::assistant("a1"),
            Message::user("u2"),
            Message::assistant("a2"),
        ];
        let config = WindowConfig::default().with_max_tokens(25);
        let out = trim_messages(&messages, &config, &FlatCounter);
        // Two fit; the window starts on a user message already.
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "u2");
    }

    #[test]
    fn keep_first_enforces_end_boundary() {
        let messages = vec![
            Message::user("u1"),
            Message::assistant("a1"),
            Message::tool("c1", "t1"),
            Message::assistant("a2"),
            Message::user("u2"),
        ];
        let config = WindowConfig::default()
            .with_strategy(TrimStrategy::KeepFirst)
            .with_max_tokens(45);
        let out = trim_messages(&messages, &config, &FlatCounter);

        // Four fit; the last retained must be a user or tool message, so
        // the trailing a2 is dropped.
        assert_eq!(out.len(), 3);
        assert_eq!(out.last().unwrap().role, Role::Tool);
    }

    #[test]
    fn trim_is_idempotent() {
        let config = WindowConfig::default().with_max_tokens(50);
        let messages = conversation();
        let once = trim_messages(&messages, &config, &FlatCounter);
        let twice = trim_messages(&once, &config, &FlatCounter);
        let roles_once: Vec<Role> = once.iter().map(|m| m.role).collect();
        let roles_twice: Vec<Role> = twice.iter().map(|m| m.role).collect();
        assert_eq!(roles_once, roles_twice);
    }

    #[test]
    fn system_not_duplicated_when_retained() {
        // Large enough budget that trimming keeps the head under
        // keep-first, where the system message survives on its own.
        let config = WindowConfig {
            strategy: TrimStrategy::KeepFirst,
            max_tokens: 25,
            ..WindowConfig::default()
        };
        let out = trim_messages(&conversation(), &config, &FlatCounter);
        let systems = out.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(systems, 1);
    }

    #[test]
    fn empty_boundary_set_fails_open() {
        let config = WindowConfig {
            start_on: vec![],
            max_tokens: 20,
            ..WindowConfig::default()
        };
        let messages = conversation();
        let out = trim_messages(&messages, &config, &FlatCounter);
        assert_eq!(out.len(), messages.len());
    }

    #[test]
    fn no_valid_start_leaves_only_system() {
        // Window would be [assistant, assistant] with no user to start
        // on: everything is dropped and the system message is preserved.
        let messages = vec![
            Message::system("sys"),
            Message::user("u1"),
            Message::assistant("a1"),
            Message::assistant("a2"),
        ];
        let config = WindowConfig::default().with_max_tokens(30);
        let out = trim_messages(&messages, &config, &FlatCounter);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::System);
    }

    #[test]
    fn manager_accumulates_stats() {
        let memory = WindowMemory::new(
            WindowConfig::default().with_max_tokens(50),
            Arc::new(CharBudgetCounter::default()),
        );
        let long = "x".repeat(400);
        let messages = vec![
            Message::user(long.clone()),
            Message::user(long.clone()),
            Message::user(long),
        ];
        let before = memory.stats();
        assert_eq!(before.total_trims, 0);

        let out = memory.apply(&messages);
        assert!(out.len() < messages.len());

        let after = memory.stats();
        assert_eq!(after.total_trims, 1);
        assert!(after.total_tokens_removed > 0);

        // Untouched input does not bump the counters.
        memory.apply(&[Message::user("short")]);
        assert_eq!(memory.stats().total_trims, 1);
    }
}

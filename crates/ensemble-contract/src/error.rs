//! Error taxonomy, retry policy, and the tool error mapper.
//!
//! Every failure the engine handles is assigned an [`ErrorCategory`] with
//! a severity and a retryable flag. Retryable categories go through the
//! exponential-backoff [`RetryPolicy`]; the rest are reported immediately.

use crate::tool::ToolError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Severity attached to an error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// The engine's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    Timeout,
    Connection,
    Validation,
    Authentication,
    Permission,
    ToolExecution,
    Llm,
    Unknown,
}

impl ErrorCategory {
    /// Severity assigned to this category.
    pub fn severity(&self) -> Severity {
        match self {
            ErrorCategory::RateLimit | ErrorCategory::Timeout => Severity::Low,
            ErrorCategory::Connection | ErrorCategory::ToolExecution => Severity::Medium,
            ErrorCategory::Validation | ErrorCategory::Llm => Severity::Medium,
            ErrorCategory::Permission => Severity::High,
            ErrorCategory::Authentication => Severity::Critical,
            ErrorCategory::Unknown => Severity::High,
        }
    }

    /// Whether the retry strategy may re-attempt this category.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimit | ErrorCategory::Timeout | ErrorCategory::Connection
        )
    }

    /// Category-keyed message safe to show to users in production mode.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimit => "The service is busy. Please try again shortly.",
            ErrorCategory::Timeout => "The operation took too long and was stopped.",
            ErrorCategory::Connection => "A downstream service could not be reached.",
            ErrorCategory::Validation => "The request was not valid.",
            ErrorCategory::Authentication => "Authentication failed.",
            ErrorCategory::Permission => "This action is not permitted.",
            ErrorCategory::ToolExecution => "A tool failed while handling the request.",
            ErrorCategory::Llm => "The language model returned an error.",
            ErrorCategory::Unknown => "An unexpected error occurred.",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Permission => "permission",
            ErrorCategory::ToolExecution => "tool_execution",
            ErrorCategory::Llm => "llm",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Classify a provider error message into a category.
///
/// Providers rarely expose structured errors, so this matches on the
/// status codes and phrases that show up in practice. Non-retryable
/// signals win over retryable ones.
pub fn classify_model_error(message: &str) -> ErrorCategory {
    let lower = message.to_ascii_lowercase();

    if ["401", "unauthorized", "invalid api key", "api key not found"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return ErrorCategory::Authentication;
    }
    if ["403", "forbidden"].iter().any(|p| lower.contains(p)) {
        return ErrorCategory::Permission;
    }
    if ["400", "404", "422", "invalid_request", "bad request"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return ErrorCategory::Validation;
    }
    if ["429", "too many requests", "rate limit"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return ErrorCategory::RateLimit;
    }
    if ["timeout", "timed out", "deadline"].iter().any(|p| lower.contains(p)) {
        return ErrorCategory::Timeout;
    }
    if [
        "connection",
        "network",
        "unavailable",
        "502",
        "503",
        "504",
        "reset by peer",
        "eof",
    ]
    .iter()
    .any(|p| lower.contains(p))
    {
        return ErrorCategory::Connection;
    }
    if ["server error", "500", "overloaded", "temporar"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return ErrorCategory::Llm;
    }
    ErrorCategory::Unknown
}

/// Exponential backoff policy for retryable categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial call.
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Multiplicative backoff factor.
    pub factor: u32,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            factor: 2,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): initial * factor^attempt,
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.max_delay_ms.max(self.initial_delay_ms);
        let factor = u64::from(self.factor.max(1));
        let mut delay = self.initial_delay_ms;
        for _ in 0..attempt {
            delay = delay.saturating_mul(factor);
            if delay >= cap {
                delay = cap;
                break;
            }
        }
        Duration::from_millis(delay.min(cap))
    }
}

/// Error reporting mode for user-visible strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportingMode {
    /// Category-keyed messages only.
    #[default]
    Production,
    /// Append error type and message for debugging.
    Development,
}

/// Renders tool errors into tool-message content.
///
/// The default mapping buckets [`ToolError`] variants into the taxonomy;
/// a custom function installed via [`ErrorMapper::with_custom`] replaces
/// the rendering entirely.
#[derive(Clone, Default)]
pub struct ErrorMapper {
    mode: ReportingMode,
    custom: Option<Arc<dyn Fn(&ToolError) -> String + Send + Sync>>,
}

impl std::fmt::Debug for ErrorMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorMapper")
            .field("mode", &self.mode)
            .field("custom", &self.custom.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl ErrorMapper {
    /// Create a mapper in the given reporting mode.
    pub fn new(mode: ReportingMode) -> Self {
        Self { mode, custom: None }
    }

    /// Install a custom rendering function.
    #[must_use]
    pub fn with_custom(
        mut self,
        f: impl Fn(&ToolError) -> String + Send + Sync + 'static,
    ) -> Self {
        self.custom = Some(Arc::new(f));
        self
    }

    /// Category assigned to a tool error.
    pub fn category_for(error: &ToolError) -> ErrorCategory {
        match error {
            ToolError::InvalidArguments(_) => ErrorCategory::Validation,
            ToolError::ExecutionFailed(_) | ToolError::Internal(_) => ErrorCategory::ToolExecution,
            ToolError::PermissionDenied(_) => ErrorCategory::Permission,
            ToolError::NotFound(_) => ErrorCategory::Validation,
            ToolError::Timeout(_) => ErrorCategory::Timeout,
        }
    }

    /// Render an error raised by `tool_name` into tool-message content.
    pub fn render(&self, tool_name: &str, error: &ToolError) -> String {
        if let Some(custom) = &self.custom {
            return custom(error);
        }
        let category = Self::category_for(error);
        match self.mode {
            ReportingMode::Production => {
                format!("Tool '{tool_name}' failed ({category}): {}", category.user_message())
            }
            ReportingMode::Development => {
                format!(
                    "Tool '{tool_name}' failed ({category}): {} [{error:?}: {error}]",
                    category.user_message()
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_flags() {
        assert!(ErrorCategory::RateLimit.retryable());
        assert!(ErrorCategory::Timeout.retryable());
        assert!(ErrorCategory::Connection.retryable());
        assert!(!ErrorCategory::Validation.retryable());
        assert!(!ErrorCategory::Authentication.retryable());
        assert!(!ErrorCategory::Permission.retryable());

        assert_eq!(ErrorCategory::Authentication.severity(), Severity::Critical);
        assert!(ErrorCategory::RateLimit.severity() < ErrorCategory::Permission.severity());
    }

    #[test]
    fn classifier_prefers_non_retryable_signals() {
        assert_eq!(
            classify_model_error("HTTP 401 Unauthorized"),
            ErrorCategory::Authentication
        );
        assert_eq!(
            classify_model_error("400 bad request: rate limit field"),
            ErrorCategory::Validation
        );
        assert_eq!(
            classify_model_error("429 Too Many Requests"),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            classify_model_error("request timed out"),
            ErrorCategory::Timeout
        );
        assert_eq!(
            classify_model_error("connection reset by peer"),
            ErrorCategory::Connection
        );
        assert_eq!(classify_model_error("weird failure"), ErrorCategory::Unknown);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 100,
            factor: 2,
            max_delay_ms: 500,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(20), Duration::from_millis(500));
    }

    #[test]
    fn backoff_overflow_is_saturating() {
        let policy = RetryPolicy {
            max_retries: 64,
            initial_delay_ms: u64::MAX / 2,
            factor: 4,
            max_delay_ms: u64::MAX,
        };
        // Must not panic on multiplication overflow.
        let _ = policy.delay_for(40);
    }

    #[test]
    fn mapper_production_hides_details() {
        let mapper = ErrorMapper::new(ReportingMode::Production);
        let rendered = mapper.render(
            "search",
            &ToolError::ExecutionFailed("stack trace here".to_string()),
        );
        assert!(rendered.contains("tool_execution"));
        assert!(!rendered.contains("stack trace"));
    }

    #[test]
    fn mapper_development_appends_details() {
        let mapper = ErrorMapper::new(ReportingMode::Development);
        let rendered = mapper.render(
            "search",
            &ToolError::InvalidArguments("missing field q".to_string()),
        );
        assert!(rendered.contains("validation"));
        assert!(rendered.contains("missing field q"));
    }

    #[test]
    fn mapper_custom_overrides() {
        let mapper = ErrorMapper::default().with_custom(|e| format!("custom: {e}"));
        let rendered = mapper.render("t", &ToolError::NotFound("x".to_string()));
        assert_eq!(rendered, "custom: not found: x");
    }
}

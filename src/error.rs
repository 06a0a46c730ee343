use std::time::Duration;

use thiserror::Error;

use crate::tools::gate::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("Command blocked ({severity}): {reason}")]
    Validation { reason: String, severity: Severity },

    #[error("Rate limit exceeded; retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("argument parse error: {0}")]
    ArgumentParse(String),

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("{tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("{}", feedback.as_deref().unwrap_or("Operation cancelled by user"))]
    UserCancellation { feedback: Option<String> },

    #[error("Operation aborted")]
    Aborted,

    #[error("A confirmation request is already outstanding")]
    ConfirmationInFlight,

    #[error("A turn is already in progress")]
    TurnInProgress,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AgentError {
    #[must_use]
    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True for outcomes the operator chose rather than faults.
    #[must_use]
    pub fn is_user_cancellation(&self) -> bool {
        matches!(self, Self::UserCancellation { .. })
    }
}

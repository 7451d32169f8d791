//! Error types for the orchestrator

use thiserror::Error;

/// Errors that can occur during orchestration
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Agent type not found in the registry
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Memory/persistence error
    #[error("Memory error: {0}")]
    Memory(String),

    /// Pool persistence error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Message rejected by the processing policy
    #[error("Message rejected: {0}")]
    PolicyReject(String),

    /// Operation was cancelled
    #[error("Operation was cancelled")]
    Cancelled,

    /// Field validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors from the LLM provider boundary
///
/// Provider-specific failures are classified into this taxonomy at the
/// client; the loop's retry policy dispatches on the variant alone.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider rejected the request for rate limiting
    #[error("Rate limited")]
    RateLimit,

    /// Messages plus tools exceed the model's context window
    #[error("Context window exceeded")]
    ContextOverflow,

    /// Authentication or authorization failure
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Transient failure worth retrying (network, 5xx)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Non-retryable failure
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl LlmError {
    /// Whether the retry policy may retry this error at all
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimit | LlmError::Timeout | LlmError::Transient(_)
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::Transient(format!("Connection error: {}", err))
        } else {
            LlmError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Internal(format!("IO error: {}", err))
    }
}

/// Result type alias for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(LlmError::RateLimit.is_retryable());
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Transient("503".into()).is_retryable());
        assert!(!LlmError::ContextOverflow.is_retryable());
        assert!(!LlmError::Auth("bad key".into()).is_retryable());
        assert!(!LlmError::Fatal("boom".into()).is_retryable());
    }
}

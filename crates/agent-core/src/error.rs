//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
///
/// The round limit is not an error; it ends a turn with a sentinel
/// response.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Connection or transfer failure talking to a provider
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status, malformed envelope, or an in-stream error event
    #[error("Provider error: {0}")]
    Provider(String),

    /// Malformed JSON or unrecognized SSE line
    #[error("Parse error: {0}")]
    Parse(String),

    /// Tool not found in registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool arguments failed validation
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Spawn, read, wait or timeout failure while running a tool
    #[error("Tool error: {0}")]
    Tool(String),

    /// A message would break conversation ordering
    #[error("Conversation error: {0}")]
    Conversation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The in-flight round was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Network(_) | AgentError::Io(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Network(_) => {
                "The AI service could not be reached. Please try again.".into()
            }
            AgentError::Provider(msg) => format!("The AI service encountered an error: {}", msg),
            AgentError::ToolNotFound(name) => format!("The tool '{}' is not available.", name),
            AgentError::ToolValidation(msg) => format!("Invalid tool input: {}", msg),
            AgentError::Tool(msg) => format!("Tool error: {}", msg),
            AgentError::Config(msg) => format!("Configuration problem: {}", msg),
            AgentError::Cancelled => "The request was cancelled.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::Network("reset".into()).is_retryable());
        assert!(!AgentError::Provider("400".into()).is_retryable());
        assert!(!AgentError::Cancelled.is_retryable());
    }

    #[test]
    fn test_user_message_mentions_provider_detail() {
        let err = AgentError::Provider("401 Unauthorized: bad key".into());
        assert!(err.user_message().contains("bad key"));
    }
}

//! Error types for the agent runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Primary error type for all agent runtime operations.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent is already streaming")]
    AlreadyStreaming,

    #[error("Agent is busy: {0} is only allowed while idle")]
    Busy(String),

    #[error("Agent is not running")]
    Unavailable,

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Event stream queue is full")]
    Overflow,

    #[error("Canceled: {0}")]
    Canceled(String),

    #[error("Event stream failed: {0}")]
    StreamFailed(String),

    #[error("Message conversion failed: {0}")]
    ConvertToLlm(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Tool execution error: {tool_name} — {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Broad classification of an [`AgentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Busy,
    Unavailable,
    Timeout,
    Backpressure,
    Canceled,
    Run,
    Tool,
    Configuration,
    Input,
    Unknown,
}

impl AgentError {
    /// Create a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadyStreaming | Self::Busy(_) => ErrorCategory::Busy,
            Self::Unavailable => ErrorCategory::Unavailable,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Overflow => ErrorCategory::Backpressure,
            Self::Canceled(_) => ErrorCategory::Canceled,
            Self::StreamFailed(_) | Self::ConvertToLlm(_) | Self::Model(_) => ErrorCategory::Run,
            Self::ToolExecution { .. } => ErrorCategory::Tool,
            Self::Configuration(_) | Self::Toml(_) => ErrorCategory::Configuration,
            Self::InvalidArgument(_) | Self::InvalidState(_) | Self::Serialization(_) => {
                ErrorCategory::Input
            }
            Self::Io(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Busy | ErrorCategory::Timeout | ErrorCategory::Backpressure
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AgentError>;

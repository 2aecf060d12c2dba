//! Model stream vocabulary consumed by the agent loop.

use serde::{Deserialize, Serialize};

use super::message::{AgentMessage, AssistantMessage, StopReason, ToolCall};

/// One event from the model's own stream.
///
/// Every variant carries `message`: the assistant message assembled so far,
/// so consumers never have to replay deltas themselves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelStreamEvent {
    Start {
        message: AssistantMessage,
    },
    TextStart {
        index: usize,
        message: AssistantMessage,
    },
    TextDelta {
        index: usize,
        delta: String,
        message: AssistantMessage,
    },
    TextEnd {
        index: usize,
        content: String,
        message: AssistantMessage,
    },
    ThinkingStart {
        index: usize,
        message: AssistantMessage,
    },
    ThinkingDelta {
        index: usize,
        delta: String,
        message: AssistantMessage,
    },
    ThinkingEnd {
        index: usize,
        content: String,
        message: AssistantMessage,
    },
    ToolCallStart {
        index: usize,
        tool_call: ToolCall,
        message: AssistantMessage,
    },
    ToolCallDelta {
        index: usize,
        delta: String,
        message: AssistantMessage,
    },
    ToolCallEnd {
        index: usize,
        tool_call: ToolCall,
        message: AssistantMessage,
    },
    Done {
        stop_reason: StopReason,
        message: AssistantMessage,
    },
    Error {
        reason: String,
        message: AssistantMessage,
    },
}

impl ModelStreamEvent {
    /// The partial (or final) assistant message carried by this event.
    pub fn message(&self) -> &AssistantMessage {
        match self {
            Self::Start { message }
            | Self::TextStart { message, .. }
            | Self::TextDelta { message, .. }
            | Self::TextEnd { message, .. }
            | Self::ThinkingStart { message, .. }
            | Self::ThinkingDelta { message, .. }
            | Self::ThinkingEnd { message, .. }
            | Self::ToolCallStart { message, .. }
            | Self::ToolCallDelta { message, .. }
            | Self::ToolCallEnd { message, .. }
            | Self::Done { message, .. }
            | Self::Error { message, .. } => message,
        }
    }

    /// Whether this event ends the model stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// Tool definition handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request context passed to `stream_fn`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Output of `convert_to_llm`.
    pub messages: Vec<AgentMessage>,
    pub tools: Vec<ToolDefinition>,
}

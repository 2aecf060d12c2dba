//! Convenience re-exports for common use.

pub use crate::abort::AbortSignal;
pub use crate::agent::{Agent, AgentOptions, AgentSnapshot, AgentStatus, QueueMode, Subscription};
pub use crate::agent_loop::{
    agent_loop, agent_loop_continue, stream, AgentContext, AgentEvent, AgentLoopConfig, StreamFn,
};
pub use crate::config::RuntimeConfig;
pub use crate::error::{AgentError, Result};
pub use crate::event_stream::{DropStrategy, EventStream, Outcome, StreamItem};
pub use crate::tools::{AgentTool, AgentToolParameters, AgentToolResult, FnTool, ToolArguments, ToolSet};
pub use crate::types::{
    AgentMessage, AssistantMessage, ContentPart, ModelRef, ModelStreamEvent, StopReason,
    StreamOptions, ThinkingLevel, ToolCall,
};

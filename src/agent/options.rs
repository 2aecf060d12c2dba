//! Construction options for [`Agent`](super::Agent).

use crate::agent_loop::{
    default_convert_to_llm, ConvertToLlmFn, GetApiKeyFn, StreamFn, TransformContextFn,
};
use crate::config::RuntimeConfig;
use crate::tools::ToolSet;
use crate::types::{AgentMessage, ModelRef, StreamOptions, ThinkingLevel};

use super::state::QueueMode;

/// Everything an agent starts with.
///
/// `model` and `stream_fn` are required; the rest defaults. The runtime
/// config defaults to [`RuntimeConfig::global`].
#[derive(Clone)]
pub struct AgentOptions {
    pub model: ModelRef,
    pub stream_fn: StreamFn,
    pub system_prompt: Option<String>,
    pub tools: ToolSet,
    /// Initial history.
    pub messages: Vec<AgentMessage>,
    pub session_id: Option<String>,
    pub thinking_level: ThinkingLevel,
    pub steering_mode: QueueMode,
    pub follow_up_mode: QueueMode,
    pub convert_to_llm: ConvertToLlmFn,
    pub transform_context: Option<TransformContextFn>,
    pub get_api_key: Option<GetApiKeyFn>,
    pub stream_options: StreamOptions,
    pub runtime: RuntimeConfig,
}

impl AgentOptions {
    pub fn new(model: ModelRef, stream_fn: StreamFn) -> Self {
        Self {
            model,
            stream_fn,
            system_prompt: None,
            tools: ToolSet::new(),
            messages: Vec::new(),
            session_id: None,
            thinking_level: ThinkingLevel::default(),
            steering_mode: QueueMode::default(),
            follow_up_mode: QueueMode::default(),
            convert_to_llm: default_convert_to_llm(),
            transform_context: None,
            get_api_key: None,
            stream_options: StreamOptions::default(),
            runtime: RuntimeConfig::global().clone(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_messages(mut self, messages: Vec<AgentMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_thinking_level(mut self, level: ThinkingLevel) -> Self {
        self.thinking_level = level;
        self
    }

    pub fn with_steering_mode(mut self, mode: QueueMode) -> Self {
        self.steering_mode = mode;
        self
    }

    pub fn with_follow_up_mode(mut self, mode: QueueMode) -> Self {
        self.follow_up_mode = mode;
        self
    }

    pub fn with_convert_to_llm(mut self, f: ConvertToLlmFn) -> Self {
        self.convert_to_llm = f;
        self
    }

    pub fn with_transform_context(mut self, f: TransformContextFn) -> Self {
        self.transform_context = Some(f);
        self
    }

    pub fn with_get_api_key(mut self, f: GetApiKeyFn) -> Self {
        self.get_api_key = Some(f);
        self
    }

    pub fn with_stream_options(mut self, options: StreamOptions) -> Self {
        self.stream_options = options;
        self
    }

    pub fn with_runtime_config(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("tools", &self.tools)
            .field("messages", &self.messages.len())
            .field("thinking_level", &self.thinking_level)
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

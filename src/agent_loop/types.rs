//! Per-run inputs for the agent loop: context, configuration and hooks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::BoxStream;
use uuid::Uuid;

use crate::abort::AbortSignal;
use crate::config::RuntimeConfig;
use crate::error::AgentError;
use crate::event_stream::{DropStrategy, EventStreamOptions, OwnerHandle};
use crate::tools::ToolSet;
use crate::types::{AgentMessage, LlmContext, ModelRef, ModelStreamEvent, StreamOptions};

/// Unique run identifier.
pub type RunId = Uuid;

/// Boxed future returned by loop hooks.
pub type HookFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Stream of model events produced by a [`StreamFn`].
pub type ModelEventStream = BoxStream<'static, ModelStreamEvent>;

/// Model invocation strategy: turns a request context into a model event stream.
pub type StreamFn = Arc<
    dyn Fn(ModelRef, LlmContext, StreamOptions) -> HookFuture<Result<ModelEventStream, AgentError>>
        + Send
        + Sync,
>;

/// Maps the conversation to what the model should see. Failure is fatal to the run.
pub type ConvertToLlmFn =
    Arc<dyn Fn(Vec<AgentMessage>) -> HookFuture<Result<Vec<AgentMessage>, AgentError>> + Send + Sync>;

/// Rewrites (usually shrinks) the context before each model request.
pub type TransformContextFn =
    Arc<dyn Fn(Vec<AgentMessage>, AbortSignal) -> HookFuture<Vec<AgentMessage>> + Send + Sync>;

/// Resolves an API key for a provider before each model request.
pub type GetApiKeyFn = Arc<dyn Fn(String) -> HookFuture<Option<String>> + Send + Sync>;

/// Pulls queued messages (steering or follow-up) to inject into the run.
pub type MessageBatchFn = Arc<dyn Fn() -> HookFuture<Vec<AgentMessage>> + Send + Sync>;

/// Observes every message the run appends, in order, including partial
/// assistant messages closed by an abort or a model error. Called inline and
/// never subject to event queue limits.
pub type MessageSinkFn = Arc<dyn Fn(&AgentMessage) + Send + Sync>;

/// Wrap an async closure as a [`StreamFn`].
pub fn stream_fn<F, Fut>(f: F) -> StreamFn
where
    F: Fn(ModelRef, LlmContext, StreamOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ModelEventStream, AgentError>> + Send + 'static,
{
    Arc::new(move |model, context, options| Box::pin(f(model, context, options)))
}

/// Wrap an async closure as a [`MessageBatchFn`].
pub fn message_batch_fn<F, Fut>(f: F) -> MessageBatchFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<AgentMessage>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Default conversion: drop app-only `Custom` messages.
pub fn default_convert_to_llm() -> ConvertToLlmFn {
    Arc::new(|messages: Vec<AgentMessage>| {
        Box::pin(async move {
            Ok(messages
                .into_iter()
                .filter(|message| !matches!(message, AgentMessage::Custom { .. }))
                .collect())
        })
    })
}

/// Immutable snapshot of the conversation a run starts from.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub system_prompt: Option<String>,
    pub messages: Vec<AgentMessage>,
    pub tools: ToolSet,
}

impl AgentContext {
    pub fn new(system_prompt: Option<String>, messages: Vec<AgentMessage>, tools: ToolSet) -> Self {
        Self {
            system_prompt,
            messages,
            tools,
        }
    }
}

/// Configuration for one loop run.
#[derive(Clone)]
pub struct AgentLoopConfig {
    pub run_id: RunId,
    pub model: ModelRef,
    pub stream_fn: StreamFn,
    pub convert_to_llm: ConvertToLlmFn,
    pub transform_context: Option<TransformContextFn>,
    pub get_api_key: Option<GetApiKeyFn>,
    pub get_steering_messages: Option<MessageBatchFn>,
    pub get_follow_up_messages: Option<MessageBatchFn>,
    pub on_message: Option<MessageSinkFn>,
    /// `None` dispatches every call of a batch at once.
    pub max_tool_concurrency: Option<usize>,
    pub stream_options: StreamOptions,
    pub event_queue_capacity: usize,
    pub drop_strategy: DropStrategy,
    /// Cancel the run's stream with `owner_down` when this owner goes away.
    pub owner: Option<OwnerHandle>,
}

impl AgentLoopConfig {
    pub fn new(model: ModelRef, stream_fn: StreamFn) -> Self {
        let defaults = RuntimeConfig::default();
        Self {
            run_id: Uuid::new_v4(),
            model,
            stream_fn,
            convert_to_llm: default_convert_to_llm(),
            transform_context: None,
            get_api_key: None,
            get_steering_messages: None,
            get_follow_up_messages: None,
            on_message: None,
            max_tool_concurrency: defaults.max_tool_concurrency,
            stream_options: StreamOptions::default(),
            event_queue_capacity: defaults.event_queue_capacity,
            drop_strategy: defaults.drop_strategy,
            owner: None,
        }
    }

    /// Take queue and concurrency limits from a runtime config.
    pub fn with_runtime_config(mut self, config: &RuntimeConfig) -> Self {
        self.event_queue_capacity = config.event_queue_capacity;
        self.drop_strategy = config.drop_strategy;
        self.max_tool_concurrency = config.max_tool_concurrency;
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
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

    pub fn with_steering_messages(mut self, f: MessageBatchFn) -> Self {
        self.get_steering_messages = Some(f);
        self
    }

    pub fn with_follow_up_messages(mut self, f: MessageBatchFn) -> Self {
        self.get_follow_up_messages = Some(f);
        self
    }

    pub fn with_on_message(mut self, f: MessageSinkFn) -> Self {
        self.on_message = Some(f);
        self
    }

    pub fn with_max_tool_concurrency(mut self, limit: usize) -> Self {
        self.max_tool_concurrency = Some(limit);
        self
    }

    pub fn with_stream_options(mut self, options: StreamOptions) -> Self {
        self.stream_options = options;
        self
    }

    pub fn with_event_queue(mut self, capacity: usize, drop_strategy: DropStrategy) -> Self {
        self.event_queue_capacity = capacity;
        self.drop_strategy = drop_strategy;
        self
    }

    pub fn with_owner(mut self, owner: OwnerHandle) -> Self {
        self.owner = Some(owner);
        self
    }

    pub(crate) fn event_stream_options(&self) -> EventStreamOptions {
        let options = EventStreamOptions::default()
            .with_max_queue(self.event_queue_capacity)
            .with_drop_strategy(self.drop_strategy);
        match &self.owner {
            Some(owner) => options.with_owner(owner.clone()),
            None => options,
        }
    }
}

impl std::fmt::Debug for AgentLoopConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoopConfig")
            .field("run_id", &self.run_id)
            .field("model", &self.model)
            .field("max_tool_concurrency", &self.max_tool_concurrency)
            .field("event_queue_capacity", &self.event_queue_capacity)
            .field("drop_strategy", &self.drop_strategy)
            .field("has_transform_context", &self.transform_context.is_some())
            .field("has_steering", &self.get_steering_messages.is_some())
            .field("has_follow_up", &self.get_follow_up_messages.is_some())
            .finish_non_exhaustive()
    }
}

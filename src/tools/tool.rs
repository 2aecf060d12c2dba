//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::arguments::ToolArguments;
use super::types::AgentToolParameters;
use crate::abort::AbortSignal;
use crate::error::AgentError;
use crate::types::{ContentPart, ToolDefinition, TrustLevel};

/// Successful output of a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentToolResult {
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<TrustLevel>,
}

impl AgentToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            ..Self::default()
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_trust(mut self, trust: TrustLevel) -> Self {
        self.trust = Some(trust);
        self
    }
}

/// Partial result reported while a tool is still running.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUpdate {
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ToolUpdate {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            details: serde_json::Value::Null,
        }
    }
}

/// Callback a running tool uses to publish [`ToolUpdate`]s.
pub type ToolUpdateFn = Arc<dyn Fn(ToolUpdate) + Send + Sync>;

/// A tool the model can call.
///
/// `execute` runs on a pool worker, possibly alongside other calls to the
/// same tool. Long-running work should poll `signal`; nothing preempts it.
/// Returning `Err` produces an error tool result and the run continues.
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Unique name the model calls the tool by.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &AgentToolParameters;

    /// Definition advertised to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().schema.clone(),
        }
    }

    async fn execute(
        &self,
        call_id: &str,
        args: ToolArguments,
        signal: AbortSignal,
        on_update: ToolUpdateFn,
    ) -> Result<AgentToolResult, AgentError>;
}

/// Per-call context handed to [`FnTool`] handlers.
#[derive(Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub signal: AbortSignal,
    on_update: ToolUpdateFn,
}

impl ToolContext {
    /// Publish a partial result.
    pub fn update(&self, update: ToolUpdate) {
        (self.on_update)(update);
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<AgentToolResult, AgentError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool.
pub struct FnTool {
    name: String,
    description: String,
    parameters: AgentToolParameters,
    handler: Arc<ToolHandler>,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: AgentToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AgentToolResult, AgentError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl AgentTool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        call_id: &str,
        args: ToolArguments,
        signal: AbortSignal,
        on_update: ToolUpdateFn,
    ) -> Result<AgentToolResult, AgentError> {
        let ctx = ToolContext {
            call_id: call_id.to_string(),
            signal,
            on_update,
        };
        (self.handler)(args, ctx).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

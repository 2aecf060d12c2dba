use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;

use crate::abort::AbortSignal;
use crate::error::AgentError;
use crate::tools::{validate_arguments, AgentTool, AgentToolResult, ToolArguments, ToolUpdateFn};
use crate::types::{ToolCall, ToolResultMessage};
use crate::util::panic_message;

use super::super::events::AgentEvent;
use super::control::AgentEventEmitter;

/// Result text for calls cut by a steering message.
pub const SKIPPED_BY_STEERING: &str = "Skipped due to steering message";
/// Result text for calls never dispatched because the run was aborted.
pub const SKIPPED_BY_ABORT: &str = "Tool execution aborted";

pub(super) fn emit_tool_execution_start(emitter: &AgentEventEmitter, call: &ToolCall) {
    emitter.emit(AgentEvent::ToolExecutionStart {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        args: call.arguments.clone(),
    });
}

pub(super) fn emit_tool_execution_end(
    emitter: &AgentEventEmitter,
    call: &ToolCall,
    result: &AgentToolResult,
    is_error: bool,
) {
    emitter.emit(AgentEvent::ToolExecutionEnd {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        result: result.clone(),
        is_error,
    });
}

pub(super) fn error_result(message: impl Into<String>) -> AgentToolResult {
    let message = message.into();
    AgentToolResult::text(message.clone()).with_details(serde_json::json!({ "error": message }))
}

pub(super) fn tool_result_message(
    call: &ToolCall,
    result: AgentToolResult,
    is_error: bool,
) -> ToolResultMessage {
    ToolResultMessage {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        content: result.content,
        details: result.details,
        is_error,
        trust: result.trust,
        timestamp: Utc::now(),
    }
}

/// Start/end pair plus an error result for a call that never ran.
pub(super) fn skipped_tool_call(
    emitter: &AgentEventEmitter,
    call: &ToolCall,
    reason: &str,
) -> ToolResultMessage {
    let result = error_result(reason);
    emit_tool_execution_start(emitter, call);
    emit_tool_execution_end(emitter, call, &result, true);
    tool_result_message(call, result, true)
}

fn error_text(err: &AgentError) -> String {
    match err {
        AgentError::InvalidArgument(message) => message.clone(),
        AgentError::ToolExecution { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Run one call to completion. Unknown tools, invalid arguments, tool
/// errors and panics all become error results; nothing escapes.
pub(super) async fn execute_tool_call(
    tool: Option<Arc<dyn AgentTool>>,
    call: ToolCall,
    signal: AbortSignal,
    emitter: AgentEventEmitter,
) -> ToolResultMessage {
    let (result, is_error) = match tool {
        Some(tool) => invoke_tool(tool, &call, signal, &emitter).await,
        None => (error_result(format!("Tool '{}' not found", call.name)), true),
    };
    emit_tool_execution_end(&emitter, &call, &result, is_error);
    tool_result_message(&call, result, is_error)
}

async fn invoke_tool(
    tool: Arc<dyn AgentTool>,
    call: &ToolCall,
    signal: AbortSignal,
    emitter: &AgentEventEmitter,
) -> (AgentToolResult, bool) {
    let args = ToolArguments::new(call.arguments.clone());
    if let Err(err) = validate_arguments(args.raw(), &tool.parameters().schema) {
        return (
            error_result(format!("Argument validation failed: {}", error_text(&err))),
            true,
        );
    }

    let update_emitter = emitter.clone();
    let call_id = call.id.clone();
    let call_name = call.name.clone();
    let call_args = call.arguments.clone();
    let on_update: ToolUpdateFn = Arc::new(move |partial_result| {
        update_emitter.emit(AgentEvent::ToolExecutionUpdate {
            tool_call_id: call_id.clone(),
            tool_name: call_name.clone(),
            args: call_args.clone(),
            partial_result,
        });
    });

    tracing::debug!(run_id = %emitter.run_id(), tool = %call.name, call_id = %call.id, "tool dispatch");
    match AssertUnwindSafe(tool.execute(&call.id, args, signal, on_update))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => (result, false),
        Ok(Err(err)) => (error_result(error_text(&err)), true),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(
                run_id = %emitter.run_id(),
                tool = %call.name,
                call_id = %call.id,
                panic = %message,
                "tool panicked"
            );
            (error_result(format!("tool panicked: {message}")), true)
        }
    }
}

use std::future::Future;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;

use crate::abort::AbortSignal;
use crate::tools::{AgentTool, ToolSet};
use crate::types::{AgentMessage, ToolCall, ToolResultMessage};

use super::super::super::types::AgentLoopConfig;
use super::super::control::{poll_messages, AgentEventEmitter};
use super::super::tooling::{
    emit_tool_execution_end, emit_tool_execution_start, error_result, execute_tool_call,
    skipped_tool_call, tool_result_message, SKIPPED_BY_ABORT, SKIPPED_BY_STEERING,
};

pub(super) struct ToolPhaseOutcome {
    /// One result per call, in call order.
    pub(super) results: Vec<ToolResultMessage>,
    /// Calls `0..dispatched` actually ran; the rest are skip placeholders.
    pub(super) dispatched: usize,
    /// Steering messages to inject after the dispatched results.
    pub(super) steering: Vec<AgentMessage>,
}

/// Execute one batch of tool calls on a bounded worker pool.
///
/// Calls are dispatched in order. Before each dispatch after the first, the
/// abort signal and the steering queue are checked; either one stops further
/// dispatch, while calls already running are awaited so no result is lost.
pub(super) async fn run_tool_phase(
    calls: Vec<ToolCall>,
    tools: &ToolSet,
    config: &AgentLoopConfig,
    signal: &AbortSignal,
    emitter: &AgentEventEmitter,
) -> ToolPhaseOutcome {
    let limit = config.max_tool_concurrency.unwrap_or(usize::MAX).max(1);
    let mut slots: Vec<Option<ToolResultMessage>> = vec![None; calls.len()];
    let mut in_flight = FuturesUnordered::new();
    let mut steering = Vec::new();
    let mut skip_reason: Option<&'static str> = None;
    let mut dispatched = 0;

    for (index, call) in calls.iter().enumerate() {
        while in_flight.len() >= limit {
            if let Some((settled, result)) = in_flight.next().await {
                slots[settled] = Some(result);
            }
        }
        if signal.is_aborted() {
            skip_reason = Some(SKIPPED_BY_ABORT);
            break;
        }
        if index > 0 {
            let injected = poll_messages(config.get_steering_messages.as_ref()).await;
            if !injected.is_empty() {
                tracing::debug!(
                    run_id = %emitter.run_id(),
                    skipped = calls.len() - index,
                    "steering message cut tool batch"
                );
                steering = injected;
                skip_reason = Some(SKIPPED_BY_STEERING);
                break;
            }
        }
        emit_tool_execution_start(emitter, call);
        in_flight.push(spawn_tool_call(
            index,
            tools.get(&call.name),
            call.clone(),
            signal.clone(),
            emitter.clone(),
        ));
        dispatched += 1;
    }

    while let Some((settled, result)) = in_flight.next().await {
        slots[settled] = Some(result);
    }

    match skip_reason {
        Some(reason) => {
            for (slot, call) in slots.iter_mut().zip(&calls).skip(dispatched) {
                *slot = Some(skipped_tool_call(emitter, call, reason));
            }
        }
        None if !signal.is_aborted() => {
            steering = poll_messages(config.get_steering_messages.as_ref()).await;
        }
        None => {}
    }

    let results = slots
        .into_iter()
        .zip(&calls)
        .map(|(slot, call)| {
            slot.unwrap_or_else(|| tool_result_message(call, error_result("tool worker lost"), true))
        })
        .collect();

    ToolPhaseOutcome {
        results,
        dispatched,
        steering,
    }
}

/// Run a call on its own task so a slow or misbehaving tool only blocks its
/// own worker.
fn spawn_tool_call(
    index: usize,
    tool: Option<Arc<dyn AgentTool>>,
    call: ToolCall,
    signal: AbortSignal,
    emitter: AgentEventEmitter,
) -> impl Future<Output = (usize, ToolResultMessage)> {
    let fallback = (call.clone(), emitter.clone());
    let handle = tokio::spawn(execute_tool_call(tool, call, signal, emitter));
    async move {
        match handle.await {
            Ok(result) => (index, result),
            Err(err) => {
                let (call, emitter) = fallback;
                tracing::error!(run_id = %emitter.run_id(), tool = %call.name, error = %err, "tool worker failed");
                let result = error_result(format!("tool worker failed: {err}"));
                emit_tool_execution_end(&emitter, &call, &result, true);
                (index, tool_result_message(&call, result, true))
            }
        }
    }
}

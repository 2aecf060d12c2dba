use crate::abort::AbortSignal;
use crate::types::{AgentMessage, StopReason, ToolCall};

use super::super::events::AgentEvent;
use super::super::types::{AgentContext, AgentLoopConfig, RunId};
use super::control::{check_continue, poll_messages, AgentEventEmitter, RunStop};

mod llm_phase;
mod tool_phase;

use llm_phase::{run_llm_phase, LlmPhaseOutcome};
use tool_phase::run_tool_phase;

/// Drive one run to a terminal outcome. Never panics on model or tool
/// failure; every exit path records exactly one outcome on the stream.
pub(crate) async fn run_agent_loop(
    prompts: Vec<AgentMessage>,
    context: AgentContext,
    config: AgentLoopConfig,
    signal: AbortSignal,
    stream: super::RunStream,
) {
    let emitter = AgentEventEmitter::new(config.run_id, stream);
    let run_id = emitter.run_id();
    tracing::debug!(
        run_id = %run_id,
        model = %config.model,
        prompts = prompts.len(),
        history = context.messages.len(),
        "agent run start"
    );
    emitter.emit(AgentEvent::AgentStart { run_id });

    let mut run = LoopRun {
        context,
        config,
        signal,
        emitter: emitter.clone(),
        new_messages: Vec::new(),
    };
    run.context.messages.extend(prompts);

    match run.drive().await {
        Ok(()) => {
            tracing::debug!(run_id = %run_id, new_messages = run.new_messages.len(), "agent run completed");
            emitter.complete(run.new_messages);
        }
        Err(RunStop::Canceled(reason)) => {
            tracing::debug!(run_id = %run_id, reason = %reason, "agent run canceled");
            emitter.cancel(reason);
        }
        Err(RunStop::Failed(reason)) => {
            tracing::error!(run_id = %run_id, reason = %reason, "agent run failed");
            emitter.fail(reason, run.new_messages);
        }
        Err(RunStop::Detached) => {
            tracing::debug!(run_id = %run_id, "event stream closed; agent run stopped");
        }
    }
}

struct LoopRun {
    context: AgentContext,
    config: AgentLoopConfig,
    signal: AbortSignal,
    emitter: AgentEventEmitter,
    new_messages: Vec<AgentMessage>,
}

impl LoopRun {
    fn run_id(&self) -> RunId {
        self.emitter.run_id()
    }

    fn check(&self) -> Result<(), RunStop> {
        check_continue(&self.signal, &self.emitter)
    }

    /// Append a message whose events were already emitted.
    fn record(&mut self, message: AgentMessage) {
        if let Some(sink) = &self.config.on_message {
            sink(&message);
        }
        self.context.messages.push(message.clone());
        self.new_messages.push(message);
    }

    /// Append a message that arrives whole (injected or tool result).
    fn inject(&mut self, message: AgentMessage) {
        self.emitter.emit_message(&message);
        self.record(message);
    }

    async fn drive(&mut self) -> Result<(), RunStop> {
        let mut pending: Vec<AgentMessage> = Vec::new();
        let mut turn_index = 0;
        loop {
            loop {
                self.check()?;
                self.emitter.emit(AgentEvent::TurnStart {
                    run_id: self.run_id(),
                    turn_index,
                });
                tracing::debug!(run_id = %self.run_id(), turn_index, "turn start");
                for message in std::mem::take(&mut pending) {
                    self.inject(message);
                }

                let assistant = match run_llm_phase(
                    &self.context,
                    &self.config,
                    &self.signal,
                    &self.emitter,
                )
                .await
                {
                    LlmPhaseOutcome::Completed(message) => message,
                    LlmPhaseOutcome::Stopped { stop, partial } => {
                        if let Some(partial) = partial {
                            self.record(AgentMessage::Assistant(partial));
                        }
                        return Err(stop);
                    }
                };
                let message = AgentMessage::Assistant(assistant.clone());
                self.record(message.clone());

                let calls: Vec<ToolCall> = assistant.tool_calls().into_iter().cloned().collect();
                if assistant.stop_reason != StopReason::ToolUse || calls.is_empty() {
                    self.emitter.emit(AgentEvent::TurnEnd {
                        run_id: self.run_id(),
                        turn_index,
                        message,
                        tool_results: Vec::new(),
                    });
                    break;
                }

                let outcome = run_tool_phase(
                    calls,
                    &self.context.tools,
                    &self.config,
                    &self.signal,
                    &self.emitter,
                )
                .await;
                let (ran, skipped) = outcome.results.split_at(outcome.dispatched);
                for result in ran {
                    self.inject(AgentMessage::ToolResult(result.clone()));
                }
                for steering in outcome.steering {
                    self.inject(steering);
                }
                for result in skipped {
                    self.inject(AgentMessage::ToolResult(result.clone()));
                }
                self.emitter.emit(AgentEvent::TurnEnd {
                    run_id: self.run_id(),
                    turn_index,
                    message,
                    tool_results: outcome.results,
                });
                turn_index += 1;
            }

            self.check()?;
            let follow_ups = poll_messages(self.config.get_follow_up_messages.as_ref()).await;
            if follow_ups.is_empty() {
                return Ok(());
            }
            tracing::debug!(run_id = %self.run_id(), count = follow_ups.len(), "follow-up messages injected");
            pending = follow_ups;
            turn_index += 1;
        }
    }
}

use futures::StreamExt;

use crate::abort::AbortSignal;
use crate::types::{
    AgentMessage, AssistantMessage, LlmContext, ModelStreamEvent, StopReason, StreamOptions,
};

use super::super::super::events::AgentEvent;
use super::super::super::types::{AgentContext, AgentLoopConfig};
use super::super::control::{abort_reason, check_continue, AgentEventEmitter, RunStop};

pub(super) enum LlmPhaseOutcome {
    Completed(AssistantMessage),
    /// `partial` is the assistant message closed with `message_end`, if the
    /// model had started one.
    Stopped {
        stop: RunStop,
        partial: Option<AssistantMessage>,
    },
}

impl LlmPhaseOutcome {
    fn stopped(stop: RunStop) -> Self {
        Self::Stopped {
            stop,
            partial: None,
        }
    }
}

pub(super) async fn run_llm_phase(
    context: &AgentContext,
    config: &AgentLoopConfig,
    signal: &AbortSignal,
    emitter: &AgentEventEmitter,
) -> LlmPhaseOutcome {
    let (request, options) = match build_request(context, config, signal).await {
        Ok(request) => request,
        Err(stop) => return LlmPhaseOutcome::stopped(stop),
    };
    if let Err(stop) = check_continue(signal, emitter) {
        return LlmPhaseOutcome::stopped(stop);
    }

    let mut model_stream =
        match (config.stream_fn)(config.model.clone(), request, options).await {
            Ok(stream) => stream,
            Err(err) => {
                return LlmPhaseOutcome::stopped(RunStop::Failed(format!(
                    "model request failed: {err}"
                )))
            }
        };

    let mut relay = MessageRelay::new(emitter);
    loop {
        let next = tokio::select! {
            biased;
            _ = signal.aborted() => None,
            event = model_stream.next() => Some(event),
        };
        let event = match next {
            None => {
                let reason = abort_reason(signal);
                return LlmPhaseOutcome::Stopped {
                    partial: relay.abandon(StopReason::Aborted, &reason),
                    stop: RunStop::Canceled(reason),
                };
            }
            Some(None) => {
                let reason = "model stream ended without a done event".to_string();
                return LlmPhaseOutcome::Stopped {
                    partial: relay.abandon(StopReason::Error, &reason),
                    stop: RunStop::Failed(reason),
                };
            }
            Some(Some(event)) => event,
        };

        match event {
            ModelStreamEvent::Start { message } => relay.start(message),
            ModelStreamEvent::Done {
                stop_reason,
                mut message,
            } => {
                message.stop_reason = stop_reason;
                return LlmPhaseOutcome::Completed(relay.end(message));
            }
            ModelStreamEvent::Error {
                reason,
                mut message,
            } => {
                message.stop_reason = StopReason::Error;
                message.error_message = Some(reason.clone());
                return LlmPhaseOutcome::Stopped {
                    partial: Some(relay.end(message)),
                    stop: RunStop::Failed(reason),
                };
            }
            delta => relay.update(delta),
        }

        if emitter.is_detached() {
            return LlmPhaseOutcome::stopped(RunStop::Detached);
        }
    }
}

async fn build_request(
    context: &AgentContext,
    config: &AgentLoopConfig,
    signal: &AbortSignal,
) -> Result<(LlmContext, StreamOptions), RunStop> {
    let messages = match &config.transform_context {
        Some(transform) => transform(context.messages.clone(), signal.clone()).await,
        None => context.messages.clone(),
    };
    let messages = (config.convert_to_llm)(messages)
        .await
        .map_err(|err| RunStop::Failed(format!("convert_to_llm failed: {err}")))?;

    let mut options = config.stream_options.clone();
    if let Some(get_api_key) = &config.get_api_key {
        if let Some(key) = get_api_key(config.model.provider.clone()).await {
            options.api_key = Some(key);
        }
    }

    Ok((
        LlmContext {
            system_prompt: context.system_prompt.clone(),
            messages,
            tools: context.tools.definitions(),
        },
        options,
    ))
}

/// Turns model events into `message_*` events for one assistant message.
struct MessageRelay<'a> {
    emitter: &'a AgentEventEmitter,
    partial: Option<AssistantMessage>,
}

impl<'a> MessageRelay<'a> {
    fn new(emitter: &'a AgentEventEmitter) -> Self {
        Self {
            emitter,
            partial: None,
        }
    }

    fn open(&mut self, message: &AssistantMessage) {
        if self.partial.is_none() {
            self.emitter.emit(AgentEvent::MessageStart {
                message: AgentMessage::Assistant(message.clone()),
            });
        }
        self.partial = Some(message.clone());
    }

    fn start(&mut self, message: AssistantMessage) {
        self.open(&message);
    }

    fn update(&mut self, delta: ModelStreamEvent) {
        let message = delta.message().clone();
        self.open(&message);
        self.emitter.emit(AgentEvent::MessageUpdate {
            message: AgentMessage::Assistant(message),
            delta,
        });
    }

    fn end(&mut self, message: AssistantMessage) -> AssistantMessage {
        self.open(&message);
        self.partial = None;
        self.emitter.emit(AgentEvent::MessageEnd {
            message: AgentMessage::Assistant(message.clone()),
        });
        message
    }

    /// Close an open message early. Returns `None` if none was started.
    fn abandon(&mut self, stop_reason: StopReason, reason: &str) -> Option<AssistantMessage> {
        let mut message = self.partial.take()?;
        message.stop_reason = stop_reason;
        message.error_message = Some(reason.to_string());
        self.emitter.emit(AgentEvent::MessageEnd {
            message: AgentMessage::Assistant(message.clone()),
        });
        Some(message)
    }
}

use crate::abort::AbortSignal;
use crate::event_stream::{EventStream, PushError};
use crate::types::AgentMessage;

use super::super::events::AgentEvent;
use super::super::types::{MessageBatchFn, RunId};

/// Event stream type carried by every run.
pub(crate) type RunStream = EventStream<AgentEvent, Vec<AgentMessage>>;

/// Why a run stopped before completing.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum RunStop {
    Canceled(String),
    Failed(String),
    /// The event stream was terminated from outside (owner down); nobody is
    /// listening anymore.
    Detached,
}

/// Pushes run events into the run's stream, tagging logs with the run id.
#[derive(Clone)]
pub(super) struct AgentEventEmitter {
    run_id: RunId,
    stream: RunStream,
}

impl AgentEventEmitter {
    pub(super) fn new(run_id: RunId, stream: RunStream) -> Self {
        Self { run_id, stream }
    }

    pub(super) fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Push one event. Overflow drops the event and the run carries on.
    pub(super) fn emit(&self, event: AgentEvent) {
        let kind = event.kind();
        match self.stream.push(event) {
            Ok(()) => tracing::trace!(run_id = %self.run_id, kind, "agent event"),
            Err(PushError::Overflow) => {
                tracing::warn!(run_id = %self.run_id, kind, "event stream full; event rejected")
            }
            Err(PushError::Canceled) => {
                tracing::trace!(run_id = %self.run_id, kind, "event stream closed; event discarded")
            }
        }
    }

    /// `message_start` + `message_end` for a message that arrives whole.
    pub(super) fn emit_message(&self, message: &AgentMessage) {
        self.emit(AgentEvent::MessageStart {
            message: message.clone(),
        });
        self.emit(AgentEvent::MessageEnd {
            message: message.clone(),
        });
    }

    pub(super) fn is_detached(&self) -> bool {
        self.stream.is_terminated()
    }

    pub(super) fn complete(&self, new_messages: Vec<AgentMessage>) {
        self.emit(AgentEvent::AgentEnd {
            run_id: self.run_id,
            new_messages: new_messages.clone(),
        });
        self.stream.complete(new_messages);
    }

    pub(super) fn fail(&self, reason: String, partial_state: Vec<AgentMessage>) {
        self.emit(AgentEvent::Error {
            run_id: self.run_id,
            reason: reason.clone(),
            partial_state: partial_state.clone(),
        });
        self.stream.error(reason, Some(partial_state));
    }

    pub(super) fn cancel(&self, reason: String) {
        self.emit(AgentEvent::Canceled {
            run_id: self.run_id,
            reason: reason.clone(),
        });
        self.stream.cancel(reason);
    }
}

/// Suspension-point check: stop on abort or when the stream is gone.
pub(super) fn check_continue(
    signal: &AbortSignal,
    emitter: &AgentEventEmitter,
) -> Result<(), RunStop> {
    if emitter.is_detached() {
        return Err(RunStop::Detached);
    }
    if signal.is_aborted() {
        return Err(RunStop::Canceled(abort_reason(signal)));
    }
    Ok(())
}

pub(super) fn abort_reason(signal: &AbortSignal) -> String {
    signal.reason().unwrap_or_else(|| "aborted".to_string())
}

/// Pull from an optional steering/follow-up hook.
pub(super) async fn poll_messages(hook: Option<&MessageBatchFn>) -> Vec<AgentMessage> {
    match hook {
        Some(hook) => hook().await,
        None => Vec::new(),
    }
}

//! The agent loop: drives one run from prompts through model turns and tool
//! batches, writing every state change into an [`EventStream`].
//!
//! The loop itself holds no state between runs. Callers hand it a
//! [`AgentContext`] snapshot and an [`AgentLoopConfig`], and read the run
//! back from the returned stream. The stream's terminal outcome carries the
//! messages produced by the run (prompts excluded).

pub mod events;
mod runner;
pub mod types;

pub use events::AgentEvent;
pub use runner::{SKIPPED_BY_ABORT, SKIPPED_BY_STEERING};
pub use types::*;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::abort::AbortSignal;
use crate::error::AgentError;
use crate::event_stream::{EventStream, StreamItem};
use crate::types::AgentMessage;

/// Stream returned by [`agent_loop`]; its outcome holds the run's new messages.
pub type AgentEventStream = EventStream<AgentEvent, Vec<AgentMessage>>;

/// Start a run with new prompt messages.
///
/// Returns immediately; the run executes on its own task, linked to the
/// stream so a crash still terminates it. Must be called inside a tokio
/// runtime.
pub fn agent_loop(
    prompts: Vec<AgentMessage>,
    context: AgentContext,
    config: AgentLoopConfig,
    signal: AbortSignal,
) -> AgentEventStream {
    let stream: AgentEventStream = EventStream::new(config.event_stream_options());
    let task = tokio::spawn(runner::run_agent_loop(
        prompts,
        context,
        config,
        signal,
        stream.clone(),
    ));
    stream.link_task(task);
    stream
}

/// Resume a run from existing history without a new prompt.
///
/// The history must be non-empty and must not end with an assistant message
/// (there would be nothing for the model to answer).
pub fn agent_loop_continue(
    context: AgentContext,
    config: AgentLoopConfig,
    signal: AbortSignal,
) -> Result<AgentEventStream, AgentError> {
    validate_continue(&context.messages)?;
    Ok(agent_loop(Vec::new(), context, config, signal))
}

pub(crate) fn validate_continue(messages: &[AgentMessage]) -> Result<(), AgentError> {
    match messages.last() {
        None => Err(AgentError::InvalidState(
            "cannot continue: no messages in context".into(),
        )),
        Some(message) if message.is_assistant() => Err(AgentError::InvalidState(
            "cannot continue from an assistant message".into(),
        )),
        Some(_) => Ok(()),
    }
}

/// Like [`agent_loop`], but yields plain events.
///
/// The sequence always ends with exactly one terminal event; if the run
/// could not emit one itself, it is synthesized from the stream outcome.
pub fn stream(
    prompts: Vec<AgentMessage>,
    context: AgentContext,
    config: AgentLoopConfig,
    signal: AbortSignal,
) -> BoxStream<'static, AgentEvent> {
    let run_id = config.run_id;
    let run = agent_loop(prompts, context, config, signal);
    into_event_stream(run_id, run)
}

pub(crate) fn into_event_stream(run_id: RunId, run: AgentEventStream) -> BoxStream<'static, AgentEvent> {
    async_stream::stream! {
        let mut items = run.events();
        let mut terminal_seen = false;
        while let Some(item) = items.next().await {
            match item {
                StreamItem::Event(event) => {
                    terminal_seen |= event.is_terminal();
                    yield event;
                }
                StreamItem::Done(outcome) => {
                    if !terminal_seen {
                        yield AgentEvent::terminal_for(run_id, outcome);
                    }
                }
            }
        }
    }
    .boxed()
}

//! Shared test helpers: a scripted model and small tool builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;

use roci_agent::agent_loop::{stream_fn, AgentEventStream, AgentLoopConfig, ModelEventStream};
use roci_agent::config::RuntimeConfig;
use roci_agent::error::AgentError;
use roci_agent::event_stream::{Outcome, StreamItem};
use roci_agent::prelude::*;
use roci_agent::tools::ToolContext;
use roci_agent::types::{LlmContext, ToolResultMessage};

pub const WAIT: Duration = Duration::from_secs(5);

/// One scripted model response.
#[derive(Debug, Clone)]
pub enum Turn {
    /// A single text delta, then `done` with `stop`.
    Text(String),
    /// Like `Text`, but waits before `done`.
    SlowText(String, Duration),
    /// One `tool_call_end` per call, then `done` with `tool_use`.
    ToolCalls(Vec<ToolCall>),
    /// `start`, then an `error` event.
    ModelError(String),
    /// `stream_fn` itself fails.
    RequestError(String),
    /// `stream_fn` panics.
    Panic(String),
    /// `start`, then nothing ever again.
    Hang,
}

/// A model that replays scripted turns and records every request.
pub struct ScriptedModel {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<(LlmContext, StreamOptions)>>,
}

impl ScriptedModel {
    pub fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn stream_fn(self: &Arc<Self>) -> StreamFn {
        let model = self.clone();
        stream_fn(move |_model_ref, context, options| {
            let model = model.clone();
            async move { model.respond(context, options) }
        })
    }

    pub fn requests(&self) -> Vec<(LlmContext, StreamOptions)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn respond(
        &self,
        context: LlmContext,
        options: StreamOptions,
    ) -> roci_agent::error::Result<ModelEventStream> {
        self.requests.lock().unwrap().push((context, options));
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Turn::Text("done".into()));
        match turn {
            Turn::Text(text) => Ok(futures::stream::iter(text_events(&text)).boxed()),
            Turn::SlowText(text, delay) => {
                let mut events = text_events(&text);
                let done = events.pop();
                let stream = async_stream::stream! {
                    for event in events {
                        yield event;
                    }
                    tokio::time::sleep(delay).await;
                    if let Some(done) = done {
                        yield done;
                    }
                };
                Ok(stream.boxed())
            }
            Turn::ToolCalls(calls) => Ok(futures::stream::iter(tool_call_events(calls)).boxed()),
            Turn::ModelError(reason) => {
                let partial = assistant_text("partial");
                Ok(futures::stream::iter(vec![
                    ModelStreamEvent::Start {
                        message: AssistantMessage::empty(),
                    },
                    ModelStreamEvent::Error {
                        reason,
                        message: partial,
                    },
                ])
                .boxed())
            }
            Turn::RequestError(reason) => Err(AgentError::Model(reason)),
            Turn::Panic(message) => panic!("{message}"),
            Turn::Hang => Ok(futures::stream::iter(vec![ModelStreamEvent::Start {
                message: AssistantMessage::empty(),
            }])
            .chain(futures::stream::pending())
            .boxed()),
        }
    }
}

pub fn assistant_text(text: &str) -> AssistantMessage {
    AssistantMessage {
        content: vec![ContentPart::text(text)],
        ..AssistantMessage::empty()
    }
}

fn text_events(text: &str) -> Vec<ModelStreamEvent> {
    let message = assistant_text(text);
    vec![
        ModelStreamEvent::Start {
            message: AssistantMessage::empty(),
        },
        ModelStreamEvent::TextDelta {
            index: 0,
            delta: text.to_string(),
            message: message.clone(),
        },
        ModelStreamEvent::Done {
            stop_reason: StopReason::Stop,
            message,
        },
    ]
}

fn tool_call_events(calls: Vec<ToolCall>) -> Vec<ModelStreamEvent> {
    let mut message = AssistantMessage::empty();
    let mut events = vec![ModelStreamEvent::Start {
        message: message.clone(),
    }];
    for (index, call) in calls.into_iter().enumerate() {
        message.content.push(ContentPart::ToolCall(call.clone()));
        events.push(ModelStreamEvent::ToolCallEnd {
            index,
            tool_call: call,
            message: message.clone(),
        });
    }
    message.stop_reason = StopReason::ToolUse;
    events.push(ModelStreamEvent::Done {
        stop_reason: StopReason::ToolUse,
        message,
    });
    events
}

pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

pub fn model_ref() -> ModelRef {
    ModelRef::new("mock", "scripted")
}

/// Runtime defaults, independent of the process environment.
pub fn runtime() -> RuntimeConfig {
    RuntimeConfig::default()
}

pub fn loop_config(model: &Arc<ScriptedModel>) -> AgentLoopConfig {
    AgentLoopConfig::new(model_ref(), model.stream_fn()).with_runtime_config(&runtime())
}

pub fn agent_options(model: &Arc<ScriptedModel>) -> AgentOptions {
    AgentOptions::new(model_ref(), model.stream_fn()).with_runtime_config(runtime())
}

/// Tool that sleeps `delay`, records its call id, and echoes it back.
pub fn sleepy_tool(name: &str, delay: Duration, log: Arc<Mutex<Vec<String>>>) -> FnTool {
    FnTool::new(
        name,
        "Sleeps, then echoes its call id",
        AgentToolParameters::empty(),
        move |_args, ctx: ToolContext| {
            let log = log.clone();
            async move {
                tokio::time::sleep(delay).await;
                log.lock().unwrap().push(ctx.call_id.clone());
                Ok(AgentToolResult::text(format!("done:{}", ctx.call_id)))
            }
        },
    )
}

/// Drain a run stream to its terminal marker.
pub async fn collect_run(run: AgentEventStream) -> (Vec<AgentEvent>, Outcome<Vec<AgentMessage>>) {
    tokio::time::timeout(WAIT, async move {
        let mut items = run.events();
        let mut events = Vec::new();
        while let Some(item) = items.next().await {
            match item {
                StreamItem::Event(event) => events.push(event),
                StreamItem::Done(outcome) => return (events, outcome),
            }
        }
        panic!("run stream ended without an outcome");
    })
    .await
    .expect("run finished in time")
}

/// Read subscriber events up to and including the first terminal one.
pub async fn collect_until_terminal(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    tokio::time::timeout(WAIT, async {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    })
    .await
    .expect("terminal event in time")
}

/// `(role, text)` per message; timestamps make whole-message equality useless.
pub fn summarize(messages: &[AgentMessage]) -> Vec<(&'static str, String)> {
    messages
        .iter()
        .map(|message| (message.role(), message.text()))
        .collect()
}

pub fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(AgentEvent::kind).collect()
}

pub fn tool_result_texts(messages: &[AgentMessage]) -> Vec<(String, String, bool)> {
    messages
        .iter()
        .filter_map(AgentMessage::as_tool_result)
        .map(|r: &ToolResultMessage| {
            (
                r.tool_call_id.clone(),
                AgentMessage::ToolResult(r.clone()).text(),
                r.is_error,
            )
        })
        .collect()
}

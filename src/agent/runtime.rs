//! Agent handle and the actor task behind it.
//!
//! Public API:
//! - [`Agent::prompt`] / [`Agent::continue_run`]: start a run
//! - [`Agent::steer`] / [`Agent::follow_up`]: inject messages into a run
//! - [`Agent::abort`]: cooperatively cancel the current run
//! - [`Agent::subscribe`]: observe every run event
//! - [`Agent::wait_for_idle`]: block the caller until the run finishes
//!
//! Every call is a message to one actor task that owns the conversation, so
//! no two calls ever race on it. Runs execute on their own tasks; the actor
//! relays their events to subscribers and folds finished messages into the
//! history.

use std::ops::ControlFlow;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};

use crate::abort::AbortSignal;
use crate::agent_loop::{
    agent_loop, message_batch_fn, validate_continue, AgentContext, AgentEvent, AgentLoopConfig,
    ConvertToLlmFn, GetApiKeyFn, MessageBatchFn, RunId, StreamFn, TransformContextFn,
};
use crate::config::RuntimeConfig;
use crate::error::AgentError;
use crate::event_stream::{owner, OwnerGuard, StreamItem};
use crate::tools::ToolSet;
use crate::types::{AgentMessage, ModelRef, StreamOptions, ThinkingLevel};
use crate::util::with_optional_timeout;

use super::options::AgentOptions;
use super::state::{AgentSnapshot, AgentState, AgentStatus, QueueMode};
use super::subscription::{next_subscription_id, Subscriber, Subscription};

type Reply<T> = oneshot::Sender<T>;

/// Messages processed by the actor, in mailbox order.
pub(crate) enum Command {
    Prompt {
        messages: Vec<AgentMessage>,
        reply: Reply<Result<RunId, AgentError>>,
    },
    Continue {
        reply: Reply<Result<RunId, AgentError>>,
    },
    Steer {
        message: AgentMessage,
    },
    FollowUp {
        message: AgentMessage,
    },
    ClearSteering,
    ClearFollowUp,
    SetSteeringMode(QueueMode),
    SetFollowUpMode(QueueMode),
    DequeueSteering {
        reply: Reply<Vec<AgentMessage>>,
    },
    DequeueFollowUp {
        reply: Reply<Vec<AgentMessage>>,
    },
    Abort {
        reason: Option<String>,
    },
    Reset,
    Mutate {
        mutation: Mutation,
        reply: Reply<Result<(), AgentError>>,
    },
    Snapshot {
        reply: Reply<AgentSnapshot>,
    },
    Subscribe {
        subscriber: Subscriber,
    },
    Unsubscribe {
        id: u64,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Idle-only state changes.
pub(crate) enum Mutation {
    SystemPrompt(Option<String>),
    Model(ModelRef),
    ThinkingLevel(ThinkingLevel),
    Tools(ToolSet),
    ReplaceMessages(Vec<AgentMessage>),
    AppendMessage(AgentMessage),
    SessionId(Option<String>),
}

impl Mutation {
    fn name(&self) -> &'static str {
        match self {
            Self::SystemPrompt(_) => "set_system_prompt",
            Self::Model(_) => "set_model",
            Self::ThinkingLevel(_) => "set_thinking_level",
            Self::Tools(_) => "set_tools",
            Self::ReplaceMessages(_) => "replace_messages",
            Self::AppendMessage(_) => "append_message",
            Self::SessionId(_) => "set_session_id",
        }
    }
}

/// Cloneable handle to a running agent.
///
/// All clones talk to the same actor. Once the actor stops (after
/// [`shutdown`](Self::shutdown)) every call fails with
/// [`AgentError::Unavailable`].
#[derive(Clone)]
pub struct Agent {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<AgentStatus>,
}

impl Agent {
    /// Start the actor task. Must be called inside a tokio runtime.
    pub fn spawn(options: AgentOptions) -> Self {
        let (commands, mailbox) = mpsc::channel(options.runtime.command_buffer.max(1));
        let (status_tx, status) = watch::channel(AgentStatus::Idle);
        let actor = AgentActor::new(options, status_tx, commands.downgrade());
        tokio::spawn(actor.serve(mailbox));
        Self { commands, status }
    }

    async fn send(&self, command: Command) -> Result<(), AgentError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AgentError::Unavailable)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, AgentError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| AgentError::Unavailable)
    }

    async fn mutate(&self, mutation: Mutation) -> Result<(), AgentError> {
        self.request(|reply| Command::Mutate { mutation, reply })
            .await?
    }

    /// Append `messages` to the history and start a run on them.
    pub async fn prompt(&self, messages: Vec<AgentMessage>) -> Result<RunId, AgentError> {
        if messages.is_empty() {
            return Err(AgentError::InvalidArgument(
                "prompt requires at least one message".into(),
            ));
        }
        self.request(|reply| Command::Prompt { messages, reply })
            .await?
    }

    /// Prompt with a single user text message.
    pub async fn prompt_text(&self, text: impl Into<String>) -> Result<RunId, AgentError> {
        self.prompt(vec![AgentMessage::user(text)]).await
    }

    /// Start a run from the existing history, e.g. after an abort.
    pub async fn continue_run(&self) -> Result<RunId, AgentError> {
        self.request(|reply| Command::Continue { reply }).await?
    }

    /// Queue a message that cuts into the current tool batch.
    pub async fn steer(&self, message: AgentMessage) -> Result<(), AgentError> {
        self.send(Command::Steer { message }).await
    }

    /// Queue a message for when the run would otherwise end.
    pub async fn follow_up(&self, message: AgentMessage) -> Result<(), AgentError> {
        self.send(Command::FollowUp { message }).await
    }

    pub async fn clear_steering_queue(&self) -> Result<(), AgentError> {
        self.send(Command::ClearSteering).await
    }

    pub async fn clear_follow_up_queue(&self) -> Result<(), AgentError> {
        self.send(Command::ClearFollowUp).await
    }

    pub async fn set_steering_mode(&self, mode: QueueMode) -> Result<(), AgentError> {
        self.send(Command::SetSteeringMode(mode)).await
    }

    pub async fn set_follow_up_mode(&self, mode: QueueMode) -> Result<(), AgentError> {
        self.send(Command::SetFollowUpMode(mode)).await
    }

    pub async fn steering_mode(&self) -> Result<QueueMode, AgentError> {
        Ok(self.snapshot().await?.steering_mode)
    }

    pub async fn follow_up_mode(&self) -> Result<QueueMode, AgentError> {
        Ok(self.snapshot().await?.follow_up_mode)
    }

    /// Raise the abort signal of the current run, if any. The run winds
    /// down at its next suspension point and ends with `canceled`.
    pub async fn abort(&self, reason: Option<&str>) -> Result<(), AgentError> {
        self.send(Command::Abort {
            reason: reason.map(str::to_string),
        })
        .await
    }

    /// Clear history, queues and error. A run in flight keeps going, but
    /// its messages no longer land in the history.
    pub async fn reset(&self) -> Result<(), AgentError> {
        self.send(Command::Reset).await
    }

    /// Wait until no run is in flight. `None` waits indefinitely.
    pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<(), AgentError> {
        if self.commands.is_closed() {
            return Err(AgentError::Unavailable);
        }
        let mut status = self.status.clone();
        with_optional_timeout(timeout, async move {
            status
                .wait_for(|status| *status == AgentStatus::Idle)
                .await
                .map(|_| ())
                .map_err(|_| AgentError::Unavailable)
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<AgentSnapshot, AgentError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Last published status, without a round trip to the actor.
    pub fn status(&self) -> AgentStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<AgentStatus> {
        self.status.clone()
    }

    /// Whether the actor is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Call `observer` for every event of every run, on a dedicated task.
    pub async fn subscribe<F>(&self, observer: F) -> Result<Subscription, AgentError>
    where
        F: Fn(AgentEvent) + Send + Sync + 'static,
    {
        let (subscription, mut events) = self.subscribe_channel().await?;
        let forwarding = subscription.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !forwarding.is_active() {
                    break;
                }
                observer(event);
            }
        });
        Ok(subscription)
    }

    /// Receive every event of every run on an unbounded channel.
    pub async fn subscribe_channel(
        &self,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<AgentEvent>), AgentError> {
        let id = next_subscription_id();
        let active = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Command::Subscribe {
            subscriber: Subscriber {
                id,
                tx,
                active: active.clone(),
            },
        })
        .await?;
        Ok((
            Subscription::new(id, active, self.commands.downgrade()),
            rx,
        ))
    }

    pub async fn set_system_prompt(&self, prompt: Option<String>) -> Result<(), AgentError> {
        self.mutate(Mutation::SystemPrompt(prompt)).await
    }

    pub async fn set_model(&self, model: ModelRef) -> Result<(), AgentError> {
        self.mutate(Mutation::Model(model)).await
    }

    pub async fn set_thinking_level(&self, level: ThinkingLevel) -> Result<(), AgentError> {
        self.mutate(Mutation::ThinkingLevel(level)).await
    }

    pub async fn set_tools(&self, tools: ToolSet) -> Result<(), AgentError> {
        self.mutate(Mutation::Tools(tools)).await
    }

    pub async fn replace_messages(&self, messages: Vec<AgentMessage>) -> Result<(), AgentError> {
        self.mutate(Mutation::ReplaceMessages(messages)).await
    }

    pub async fn append_message(&self, message: AgentMessage) -> Result<(), AgentError> {
        self.mutate(Mutation::AppendMessage(message)).await
    }

    pub async fn set_session_id(&self, session_id: Option<String>) -> Result<(), AgentError> {
        self.mutate(Mutation::SessionId(session_id)).await
    }

    /// Abort any run and stop the actor.
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("status", &self.status())
            .field("running", &self.is_running())
            .finish()
    }
}

struct ActiveRun {
    run_id: RunId,
    /// Reset generation the run was started in.
    epoch: u64,
    items: BoxStream<'static, StreamItem<AgentEvent, Vec<AgentMessage>>>,
    /// Every message the run records, fed by its `on_message` hook.
    messages: mpsc::UnboundedReceiver<AgentMessage>,
    terminal_seen: bool,
}

enum Step {
    Command(Option<Command>),
    Run(Option<StreamItem<AgentEvent, Vec<AgentMessage>>>),
}

#[derive(Clone, Copy)]
enum QueueKind {
    Steering,
    FollowUp,
}

struct AgentActor {
    state: AgentState,
    stream_fn: StreamFn,
    convert_to_llm: ConvertToLlmFn,
    transform_context: Option<TransformContextFn>,
    get_api_key: Option<GetApiKeyFn>,
    stream_options: StreamOptions,
    runtime: RuntimeConfig,
    signal: AbortSignal,
    status: watch::Sender<AgentStatus>,
    subscribers: Vec<Subscriber>,
    run: Option<ActiveRun>,
    epoch: u64,
    commands: mpsc::WeakSender<Command>,
    owner: OwnerGuard,
}

impl AgentActor {
    fn new(
        options: AgentOptions,
        status: watch::Sender<AgentStatus>,
        commands: mpsc::WeakSender<Command>,
    ) -> Self {
        let (owner, _) = owner();
        Self {
            state: AgentState {
                model: options.model,
                system_prompt: options.system_prompt,
                thinking_level: options.thinking_level,
                session_id: options.session_id,
                tools: options.tools,
                messages: options.messages,
                error: None,
                steering_queue: Default::default(),
                follow_up_queue: Default::default(),
                steering_mode: options.steering_mode,
                follow_up_mode: options.follow_up_mode,
            },
            stream_fn: options.stream_fn,
            convert_to_llm: options.convert_to_llm,
            transform_context: options.transform_context,
            get_api_key: options.get_api_key,
            stream_options: options.stream_options,
            runtime: options.runtime,
            signal: AbortSignal::new(),
            status,
            subscribers: Vec::new(),
            run: None,
            epoch: 0,
            commands,
            owner,
        }
    }

    async fn serve(mut self, mut mailbox: mpsc::Receiver<Command>) {
        tracing::debug!(model = %self.state.model, "agent started");
        loop {
            let step = tokio::select! {
                biased;
                command = mailbox.recv() => Step::Command(command),
                item = next_run_item(&mut self.run) => Step::Run(item),
            };
            match step {
                Step::Command(Some(command)) => {
                    if let ControlFlow::Break(reply) = self.handle_command(command) {
                        mailbox.close();
                        self.stop_run();
                        let _ = reply.send(());
                        break;
                    }
                }
                Step::Command(None) => break,
                Step::Run(item) => self.handle_run_item(item),
            }
        }
        self.stop_run();
        tracing::debug!(model = %self.state.model, "agent stopped");
    }

    fn stop_run(&self) {
        if let Some(run) = &self.run {
            tracing::debug!(run_id = %run.run_id, "agent stopping; aborting run");
            self.signal.abort(Some("agent stopped"));
        }
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<Reply<()>> {
        match command {
            Command::Prompt { messages, reply } => {
                let _ = reply.send(self.start_run(messages, false));
            }
            Command::Continue { reply } => {
                let _ = reply.send(self.start_run(Vec::new(), true));
            }
            Command::Steer { message } => self.state.steering_queue.push_back(message),
            Command::FollowUp { message } => self.state.follow_up_queue.push_back(message),
            Command::ClearSteering => self.state.steering_queue.clear(),
            Command::ClearFollowUp => self.state.follow_up_queue.clear(),
            Command::SetSteeringMode(mode) => self.state.steering_mode = mode,
            Command::SetFollowUpMode(mode) => self.state.follow_up_mode = mode,
            Command::DequeueSteering { reply } => {
                let _ = reply.send(self.dequeue(QueueKind::Steering));
            }
            Command::DequeueFollowUp { reply } => {
                let _ = reply.send(self.dequeue(QueueKind::FollowUp));
            }
            Command::Abort { reason } => {
                if let Some(run) = &self.run {
                    tracing::debug!(run_id = %run.run_id, reason = ?reason, "abort requested");
                    self.signal.abort(reason.as_deref());
                }
            }
            Command::Reset => {
                self.epoch += 1;
                self.state.reset();
                tracing::debug!(streaming = self.run.is_some(), "agent reset");
            }
            Command::Mutate { mutation, reply } => {
                let _ = reply.send(self.apply(mutation));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Subscribe { subscriber } => self.subscribers.push(subscriber),
            Command::Unsubscribe { id } => self.subscribers.retain(|s| s.id != id),
            Command::Shutdown { reply } => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    fn start_run(&mut self, prompts: Vec<AgentMessage>, resume: bool) -> Result<RunId, AgentError> {
        if self.run.is_some() {
            return Err(AgentError::AlreadyStreaming);
        }
        if resume {
            validate_continue(&self.state.messages)?;
        }

        let context = AgentContext::new(
            self.state.system_prompt.clone(),
            self.state.messages.clone(),
            self.state.tools.clone(),
        );
        self.state.messages.extend(prompts.iter().cloned());
        self.state.error = None;
        self.signal.clear();

        let (record, messages) = mpsc::unbounded_channel();
        let config = self.loop_config().with_on_message(Arc::new(move |message| {
            let _ = record.send(message.clone());
        }));
        let run_id = config.run_id;
        let stream = agent_loop(prompts, context, config, self.signal.clone());
        self.run = Some(ActiveRun {
            run_id,
            epoch: self.epoch,
            items: stream.events(),
            messages,
            terminal_seen: false,
        });
        self.status.send_replace(AgentStatus::Streaming);
        tracing::debug!(run_id = %run_id, resume, "agent run started");
        Ok(run_id)
    }

    fn loop_config(&self) -> AgentLoopConfig {
        let mut options = self.stream_options.clone();
        if self.state.session_id.is_some() {
            options.session_id = self.state.session_id.clone();
        }
        options.reasoning = match self.state.thinking_level {
            ThinkingLevel::Off => None,
            level => Some(level),
        };

        let mut config = AgentLoopConfig::new(self.state.model.clone(), self.stream_fn.clone())
            .with_runtime_config(&self.runtime)
            .with_convert_to_llm(self.convert_to_llm.clone())
            .with_stream_options(options)
            .with_owner(self.owner.handle())
            .with_steering_messages(queue_hook(
                self.commands.clone(),
                QueueKind::Steering,
                Duration::ZERO,
            ))
            .with_follow_up_messages(queue_hook(
                self.commands.clone(),
                QueueKind::FollowUp,
                self.runtime.follow_up_grace(),
            ));
        if let Some(transform) = &self.transform_context {
            config = config.with_transform_context(transform.clone());
        }
        if let Some(get_api_key) = &self.get_api_key {
            config = config.with_get_api_key(get_api_key.clone());
        }
        config
    }

    /// Hand queued messages to the current run. A run started before a
    /// reset gets nothing.
    fn dequeue(&mut self, kind: QueueKind) -> Vec<AgentMessage> {
        if self.run.as_ref().map(|run| run.epoch) != Some(self.epoch) {
            return Vec::new();
        }
        match kind {
            QueueKind::Steering => self.state.steering_mode.dequeue(&mut self.state.steering_queue),
            QueueKind::FollowUp => self.state.follow_up_mode.dequeue(&mut self.state.follow_up_queue),
        }
    }

    fn apply(&mut self, mutation: Mutation) -> Result<(), AgentError> {
        if self.run.is_some() {
            return Err(AgentError::Busy(mutation.name().to_string()));
        }
        match mutation {
            Mutation::SystemPrompt(prompt) => self.state.system_prompt = prompt,
            Mutation::Model(model) => self.state.model = model,
            Mutation::ThinkingLevel(level) => self.state.thinking_level = level,
            Mutation::Tools(tools) => self.state.tools = tools,
            Mutation::ReplaceMessages(messages) => self.state.messages = messages,
            Mutation::AppendMessage(message) => self.state.messages.push(message),
            Mutation::SessionId(session_id) => self.state.session_id = session_id,
        }
        Ok(())
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            status: *self.status.borrow(),
            run_id: self.run.as_ref().map(|run| run.run_id),
            model: self.state.model.clone(),
            system_prompt: self.state.system_prompt.clone(),
            thinking_level: self.state.thinking_level,
            session_id: self.state.session_id.clone(),
            messages: self.state.messages.clone(),
            tool_names: self.state.tools.names(),
            error: self.state.error.clone(),
            steering_queue_len: self.state.steering_queue.len(),
            follow_up_queue_len: self.state.follow_up_queue.len(),
            steering_mode: self.state.steering_mode,
            follow_up_mode: self.state.follow_up_mode,
        }
    }

    fn handle_run_item(&mut self, item: Option<StreamItem<AgentEvent, Vec<AgentMessage>>>) {
        let Some((run_id, epoch, terminal_seen)) = self
            .run
            .as_ref()
            .map(|run| (run.run_id, run.epoch, run.terminal_seen))
        else {
            return;
        };
        let current = epoch == self.epoch;
        self.absorb_messages(current);

        match item {
            Some(StreamItem::Event(event)) => {
                if event.is_terminal() {
                    if let Some(run) = self.run.as_mut() {
                        run.terminal_seen = true;
                    }
                }
                self.relay(event, current);
            }
            Some(StreamItem::Done(outcome)) => {
                if !terminal_seen {
                    let event = AgentEvent::terminal_for(run_id, outcome);
                    tracing::warn!(
                        run_id = %run_id,
                        kind = event.kind(),
                        "run ended without its own terminal event"
                    );
                    self.relay(event, current);
                }
                self.finish_run(run_id);
            }
            None => self.finish_run(run_id),
        }
    }

    /// Move messages the run has recorded so far into the history. History
    /// never depends on events, which a full queue may drop. A run that
    /// predates a reset has its messages discarded.
    fn absorb_messages(&mut self, current: bool) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        while let Ok(message) = run.messages.try_recv() {
            if current {
                self.state.messages.push(message);
            }
        }
    }

    /// Record a run failure (unless the run predates a reset) and fan the
    /// event out to subscribers.
    fn relay(&mut self, event: AgentEvent, current: bool) {
        if current {
            if let AgentEvent::Error { reason, .. } = &event {
                self.state.error = Some(reason.clone());
            }
        }
        self.subscribers
            .retain(|subscriber| subscriber.deliver(event.clone()));
    }

    fn finish_run(&mut self, run_id: RunId) {
        self.run = None;
        self.status.send_replace(AgentStatus::Idle);
        tracing::debug!(run_id = %run_id, "agent idle");
    }
}

async fn next_run_item(
    run: &mut Option<ActiveRun>,
) -> Option<StreamItem<AgentEvent, Vec<AgentMessage>>> {
    match run {
        Some(run) => run.items.next().await,
        None => std::future::pending().await,
    }
}

/// Pull hook bound to the actor's queues. With a non-zero `grace`, an empty
/// queue is re-checked once after waiting, so a message queued just as the
/// run concludes is still picked up.
fn queue_hook(
    commands: mpsc::WeakSender<Command>,
    kind: QueueKind,
    grace: Duration,
) -> MessageBatchFn {
    message_batch_fn(move || {
        let commands = commands.clone();
        async move {
            let batch = dequeue_remote(&commands, kind).await;
            if !batch.is_empty() || grace.is_zero() {
                return batch;
            }
            tokio::time::sleep(grace).await;
            dequeue_remote(&commands, kind).await
        }
    })
}

async fn dequeue_remote(commands: &mpsc::WeakSender<Command>, kind: QueueKind) -> Vec<AgentMessage> {
    let Some(commands) = commands.upgrade() else {
        return Vec::new();
    };
    let (reply, response) = oneshot::channel();
    let command = match kind {
        QueueKind::Steering => Command::DequeueSteering { reply },
        QueueKind::FollowUp => Command::DequeueFollowUp { reply },
    };
    let sent = commands.send(command).await.is_ok();
    drop(commands);
    if !sent {
        return Vec::new();
    }
    response.await.unwrap_or_default()
}

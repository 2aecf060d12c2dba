//! Bounded, cancellable producer/consumer event channel.
//!
//! An [`EventStream`] carries events of type `E` from one producer to one
//! consumer and finishes with exactly one terminal [`Outcome`] carrying an
//! `R`. Pushing never blocks: a full queue is handled by the stream's
//! [`DropStrategy`]. Consumers pull lazily through [`EventStream::events`]
//! and only wait while the queue is empty and no outcome has been recorded.
//!
//! A stream can watch its owner (see [`owner`]) and a linked producer task.
//! An owner going down cancels the stream with `owner_down`; a producer task
//! that ends without recording an outcome errors the stream, so a crashed
//! producer never leaves its consumer waiting forever.

pub mod owner;

pub use owner::{owner, OwnerGuard, OwnerHandle};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::util::{panic_message, with_timeout};

/// Cancel reason used when the declared owner goes away.
pub const OWNER_DOWN: &str = "owner_down";
/// Error reason used when a linked producer returns without an outcome.
pub const PRODUCER_EXITED: &str = "producer_exited";

/// Policy for a push against a full queue.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DropStrategy {
    /// Reject the push with [`PushError::Overflow`].
    #[default]
    Error,
    /// Evict the oldest queued event to make room.
    DropOldest,
    /// Discard the incoming event.
    DropNewest,
}

/// Why a push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("event stream queue is full")]
    Overflow,
    #[error("event stream already terminated")]
    Canceled,
}

impl From<PushError> for AgentError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::Overflow => AgentError::Overflow,
            PushError::Canceled => AgentError::Canceled("event stream terminated".into()),
        }
    }
}

/// Terminal outcome of a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<R> {
    Completed(R),
    Errored { reason: String, partial: Option<R> },
    Canceled { reason: String },
}

impl<R> Outcome<R> {
    pub fn into_result(self) -> Result<R, AgentError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Errored { reason, .. } => Err(AgentError::StreamFailed(reason)),
            Self::Canceled { reason } => Err(AgentError::Canceled(reason)),
        }
    }
}

/// One item pulled from [`EventStream::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<E, R> {
    Event(E),
    /// Always the last item.
    Done(Outcome<R>),
}

/// Queue occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub queue_size: usize,
    pub max_queue: usize,
    pub dropped: u64,
}

/// Construction options for [`EventStream`].
#[derive(Debug, Clone)]
pub struct EventStreamOptions {
    pub max_queue: usize,
    pub drop_strategy: DropStrategy,
    pub owner: Option<OwnerHandle>,
}

impl Default for EventStreamOptions {
    fn default() -> Self {
        Self {
            max_queue: 1024,
            drop_strategy: DropStrategy::Error,
            owner: None,
        }
    }
}

impl EventStreamOptions {
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    pub fn with_drop_strategy(mut self, drop_strategy: DropStrategy) -> Self {
        self.drop_strategy = drop_strategy;
        self
    }

    pub fn with_owner(mut self, owner: OwnerHandle) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// Bounded single-producer/single-consumer event channel. See the module docs.
pub struct EventStream<E, R = ()> {
    shared: Arc<Shared<E, R>>,
}

impl<E, R> Clone for EventStream<E, R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<E, R> {
    state: Mutex<State<E, R>>,
    changed: Notify,
    closed: CancellationToken,
    max_queue: usize,
    drop_strategy: DropStrategy,
}

struct State<E, R> {
    queue: VecDeque<E>,
    outcome: Option<Outcome<R>>,
    dropped: u64,
}

impl<E, R> Drop for Shared<E, R> {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl<E, R> Shared<E, R> {
    fn lock(&self) -> MutexGuard<'_, State<E, R>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(&self, outcome: Outcome<R>) -> bool {
        {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
        }
        self.closed.cancel();
        self.changed.notify_waiters();
        true
    }
}

impl<E, R> EventStream<E, R>
where
    E: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Create a stream. Spawns an owner monitor when `options.owner` is set,
    /// so this must run inside a tokio runtime in that case.
    pub fn new(options: EventStreamOptions) -> Self {
        let stream = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    outcome: None,
                    dropped: 0,
                }),
                changed: Notify::new(),
                closed: CancellationToken::new(),
                max_queue: options.max_queue.max(1),
                drop_strategy: options.drop_strategy,
            }),
        };
        if let Some(owner) = options.owner {
            stream.monitor_owner(owner);
        }
        stream
    }

    /// Enqueue an event, applying the drop strategy when full.
    pub fn push(&self, event: E) -> Result<(), PushError> {
        {
            let mut state = self.shared.lock();
            if state.outcome.is_some() {
                return Err(PushError::Canceled);
            }
            if state.queue.len() >= self.shared.max_queue {
                match self.shared.drop_strategy {
                    DropStrategy::Error => return Err(PushError::Overflow),
                    DropStrategy::DropOldest => {
                        state.queue.pop_front();
                        state.dropped += 1;
                    }
                    DropStrategy::DropNewest => {
                        state.dropped += 1;
                        return Ok(());
                    }
                }
            }
            state.queue.push_back(event);
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }

    /// Fire-and-forget [`push`](Self::push): same queueing, no result.
    pub fn push_async(&self, event: E) {
        if let Err(err) = self.push(event) {
            tracing::trace!(error = %err, "event stream push_async refused event");
        }
    }

    /// Record a successful outcome. Returns `false` if already terminated.
    pub fn complete(&self, result: R) -> bool {
        self.shared.finish(Outcome::Completed(result))
    }

    /// Record a failure. Returns `false` if already terminated.
    pub fn error(&self, reason: impl Into<String>, partial: Option<R>) -> bool {
        self.shared.finish(Outcome::Errored {
            reason: reason.into(),
            partial,
        })
    }

    /// Record a cancellation. Returns `false` if already terminated.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.shared.finish(Outcome::Canceled {
            reason: reason.into(),
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.lock().outcome.is_some()
    }

    /// The recorded outcome, if any.
    pub fn outcome(&self) -> Option<Outcome<R>> {
        self.shared.lock().outcome.clone()
    }

    pub fn stats(&self) -> StreamStats {
        let state = self.shared.lock();
        StreamStats {
            queue_size: state.queue.len(),
            max_queue: self.shared.max_queue,
            dropped: state.dropped,
        }
    }

    /// Pull the next item, waiting while the queue is empty and the stream
    /// is still open. Once terminated this keeps returning the outcome.
    pub async fn next_item(&self) -> StreamItem<E, R> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.lock();
                if let Some(event) = state.queue.pop_front() {
                    return StreamItem::Event(event);
                }
                if let Some(outcome) = &state.outcome {
                    return StreamItem::Done(outcome.clone());
                }
            }
            notified.await;
        }
    }

    /// Lazy, single-pass sequence of queued events ending with one
    /// [`StreamItem::Done`].
    pub fn events(&self) -> BoxStream<'static, StreamItem<E, R>> {
        let stream = self.clone();
        async_stream::stream! {
            loop {
                let item = stream.next_item().await;
                let done = matches!(item, StreamItem::Done(_));
                yield item;
                if done {
                    break;
                }
            }
        }
        .boxed()
    }

    /// Wait for the terminal outcome only, ignoring events.
    pub async fn result(&self, timeout: Duration) -> Result<R, AgentError> {
        with_timeout(timeout, async { self.wait_outcome().await.into_result() }).await
    }

    async fn wait_outcome(&self) -> Outcome<R> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Watch a producer task. If it ends without recording an outcome the
    /// stream errors with the task's failure.
    pub fn link_task(&self, task: JoinHandle<()>) {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let reason = match task.await {
                Ok(()) => PRODUCER_EXITED.to_string(),
                Err(err) if err.is_panic() => {
                    format!("producer_crashed: {}", panic_message(err.into_panic().as_ref()))
                }
                Err(_) => "producer_canceled".to_string(),
            };
            if let Some(shared) = Weak::upgrade(&weak) {
                if shared.finish(Outcome::Errored {
                    reason: reason.clone(),
                    partial: None,
                }) {
                    tracing::error!(reason = %reason, "event stream producer ended without an outcome");
                }
            }
        });
    }

    fn monitor_owner(&self, owner: OwnerHandle) {
        let weak = Arc::downgrade(&self.shared);
        let closed = self.shared.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => {}
                _ = owner.down() => {
                    if let Some(shared) = Weak::upgrade(&weak) {
                        if shared.finish(Outcome::Canceled { reason: OWNER_DOWN.to_string() }) {
                            tracing::debug!("event stream owner down; stream canceled");
                        }
                    }
                }
            }
        });
    }
}

impl<E, R> std::fmt::Debug for EventStream<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("EventStream")
            .field("queue_size", &state.queue.len())
            .field("max_queue", &self.shared.max_queue)
            .field("dropped", &state.dropped)
            .field("drop_strategy", &self.shared.drop_strategy)
            .field("terminated", &state.outcome.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bounded(max_queue: usize, drop_strategy: DropStrategy) -> EventStream<u32, &'static str> {
        EventStream::new(
            EventStreamOptions::default()
                .with_max_queue(max_queue)
                .with_drop_strategy(drop_strategy),
        )
    }

    async fn drain(stream: &EventStream<u32, &'static str>) -> (Vec<u32>, Outcome<&'static str>) {
        let mut events = stream.events();
        let mut seen = Vec::new();
        while let Some(item) = events.next().await {
            match item {
                StreamItem::Event(event) => seen.push(event),
                StreamItem::Done(outcome) => return (seen, outcome),
            }
        }
        panic!("stream ended without a terminal item");
    }

    #[tokio::test]
    async fn error_strategy_rejects_the_overflowing_push() {
        let stream = bounded(3, DropStrategy::Error);
        for n in 1..=3 {
            stream.push(n).unwrap();
        }

        assert_eq!(stream.push(4), Err(PushError::Overflow));
        assert_eq!(
            stream.stats(),
            StreamStats {
                queue_size: 3,
                max_queue: 3,
                dropped: 0
            }
        );

        stream.complete("ok");
        let (events, outcome) = drain(&stream).await;
        assert_eq!(events, vec![1, 2, 3]);
        assert_eq!(outcome, Outcome::Completed("ok"));
    }

    #[tokio::test]
    async fn drop_oldest_keeps_the_newest_window() {
        let stream = bounded(3, DropStrategy::DropOldest);
        for n in 1..=4 {
            stream.push(n).unwrap();
        }
        assert_eq!(stream.stats().dropped, 1);

        stream.complete("ok");
        let (events, _) = drain(&stream).await;
        assert_eq!(events, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn drop_newest_discards_the_incoming_event() {
        let stream = bounded(2, DropStrategy::DropNewest);
        for n in 1..=4 {
            stream.push(n).unwrap();
        }
        assert_eq!(stream.stats().dropped, 2);

        stream.complete("ok");
        let (events, _) = drain(&stream).await;
        assert_eq!(events, vec![1, 2]);
    }

    #[tokio::test]
    async fn first_terminal_call_wins() {
        let stream = bounded(4, DropStrategy::Error);
        assert!(stream.cancel("stop"));
        assert!(!stream.complete("late"));
        assert!(!stream.error("later", None));
        assert_eq!(stream.push(1), Err(PushError::Canceled));
        assert_eq!(
            stream.outcome(),
            Some(Outcome::Canceled {
                reason: "stop".into()
            })
        );
    }

    #[tokio::test]
    async fn events_block_until_producer_pushes() {
        let stream = bounded(8, DropStrategy::Error);
        let producer = stream.clone();
        tokio::spawn(async move {
            for n in 0..3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                producer.push(n).unwrap();
            }
            producer.complete("done");
        });

        let (events, outcome) = drain(&stream).await;
        assert_eq!(events, vec![0, 1, 2]);
        assert_eq!(outcome, Outcome::Completed("done"));
    }

    #[tokio::test]
    async fn terminal_marker_is_yielded_once_per_consumer() {
        let stream = bounded(4, DropStrategy::Error);
        stream.error("boom", Some("partial"));
        let items: Vec<_> = stream.events().collect().await;
        assert_eq!(
            items,
            vec![StreamItem::Done(Outcome::Errored {
                reason: "boom".into(),
                partial: Some("partial"),
            })]
        );
        let again: Vec<_> = stream.events().collect().await;
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn result_ignores_events_and_maps_outcomes() {
        let stream = bounded(4, DropStrategy::Error);
        stream.push(1).unwrap();
        stream.complete("value");
        assert_eq!(stream.result(Duration::from_secs(1)).await.unwrap(), "value");

        let failed = bounded(4, DropStrategy::Error);
        failed.error("bad", None);
        assert!(matches!(
            failed.result(Duration::from_secs(1)).await,
            Err(AgentError::StreamFailed(reason)) if reason == "bad"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn result_times_out_without_outcome() {
        let stream = bounded(4, DropStrategy::Error);
        let err = stream.result(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(20)));
    }

    #[tokio::test]
    async fn owner_down_cancels_stream() {
        let (guard, handle) = owner();
        let stream: EventStream<u32, &'static str> =
            EventStream::new(EventStreamOptions::default().with_owner(handle));
        stream.push(7).unwrap();

        let owner_task = tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_millis(5)).await;
        });
        owner_task.await.unwrap();

        let (events, outcome) = tokio::time::timeout(Duration::from_secs(1), drain(&stream))
            .await
            .expect("owner_down observed");
        assert_eq!(events, vec![7]);
        assert_eq!(
            outcome,
            Outcome::Canceled {
                reason: OWNER_DOWN.into()
            }
        );
    }

    #[tokio::test]
    async fn crashed_producer_errors_stream() {
        let stream = bounded(4, DropStrategy::Error);
        let producer = stream.clone();
        let task = tokio::spawn(async move {
            producer.push(1).unwrap();
            panic!("model client exploded");
        });
        stream.link_task(task);

        let (events, outcome) = tokio::time::timeout(Duration::from_secs(1), drain(&stream))
            .await
            .expect("crash observed");
        assert_eq!(events, vec![1]);
        match outcome {
            Outcome::Errored { reason, partial } => {
                assert!(reason.starts_with("producer_crashed"));
                assert!(reason.contains("model client exploded"));
                assert_eq!(partial, None);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn producer_exit_without_outcome_errors_stream() {
        let stream = bounded(4, DropStrategy::Error);
        stream.link_task(tokio::spawn(async {}));
        let (_, outcome) = tokio::time::timeout(Duration::from_secs(1), drain(&stream))
            .await
            .expect("exit observed");
        assert_eq!(
            outcome,
            Outcome::Errored {
                reason: PRODUCER_EXITED.into(),
                partial: None
            }
        );
    }

    #[tokio::test]
    async fn producer_that_completes_is_not_overridden() {
        let stream = bounded(4, DropStrategy::Error);
        let producer = stream.clone();
        let task = tokio::spawn(async move {
            producer.complete("fine");
        });
        stream.link_task(task);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(stream.outcome(), Some(Outcome::Completed("fine")));
    }

    #[test]
    fn drop_strategy_parses_snake_case() {
        assert_eq!(
            "drop_oldest".parse::<DropStrategy>().unwrap(),
            DropStrategy::DropOldest
        );
        assert_eq!(DropStrategy::DropNewest.to_string(), "drop_newest");
    }
}

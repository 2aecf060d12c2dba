//! Observer registrations for agent events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::agent_loop::AgentEvent;

use super::runtime::Command;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_subscription_id() -> u64 {
    NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Actor-side record of one observer.
pub(crate) struct Subscriber {
    pub(crate) id: u64,
    pub(crate) tx: mpsc::UnboundedSender<AgentEvent>,
    pub(crate) active: Arc<AtomicBool>,
}

impl Subscriber {
    /// Deliver an event. `false` means the subscriber is gone.
    pub(crate) fn deliver(&self, event: AgentEvent) -> bool {
        self.active.load(Ordering::Acquire) && self.tx.send(event).is_ok()
    }
}

/// Handle returned by [`Agent::subscribe`](super::Agent::subscribe).
///
/// Dropping it does not unsubscribe; call [`unsubscribe`](Self::unsubscribe).
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    commands: mpsc::WeakSender<Command>,
}

impl Subscription {
    pub(crate) fn new(id: u64, active: Arc<AtomicBool>, commands: mpsc::WeakSender<Command>) -> Self {
        Self {
            id,
            active,
            commands,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop delivery. Idempotent, non-blocking, and safe to call from inside
    /// the subscriber's own callback.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(commands) = self.commands.upgrade() {
            // A full mailbox is fine: the actor prunes inactive subscribers
            // on the next broadcast.
            let _ = commands.try_send(Command::Unsubscribe { id: self.id });
        }
    }
}

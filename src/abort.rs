//! Cooperative cancellation shared by an agent, its run and every tool worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::Notify;

const DEFAULT_REASON: &str = "aborted";

/// Shared abort flag.
///
/// Cloning is cheap and every clone observes the same flag. Reads are a
/// single atomic load; `abort` is idempotent and `clear` re-arms the signal
/// for the next run. Nothing is ever preempted: tools poll
/// [`is_aborted`](Self::is_aborted) or await [`aborted`](Self::aborted).
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    aborted: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. The first reason wins; later calls are no-ops.
    pub fn abort(&self, reason: Option<&str>) {
        {
            let mut slot = self
                .inner
                .reason
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if self.inner.aborted.load(Ordering::Acquire) {
                return;
            }
            *slot = Some(reason.unwrap_or(DEFAULT_REASON).to_string());
            self.inner.aborted.store(true, Ordering::Release);
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// Reason given to the first `abort`, if aborted.
    pub fn reason(&self) -> Option<String> {
        if !self.is_aborted() {
            return None;
        }
        self.inner
            .reason
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-arm the signal.
    pub fn clear(&self) {
        let mut slot = self
            .inner
            .reason
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.inner.aborted.store(false, Ordering::Release);
        *slot = None;
    }

    /// Resolve once the signal is raised.
    pub async fn aborted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }

    /// Whether two handles share the same flag.
    pub fn same_signal(&self, other: &AbortSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

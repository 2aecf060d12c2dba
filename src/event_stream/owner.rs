//! Liveness tokens for event stream owners.

use tokio_util::sync::{CancellationToken, DropGuard};

/// Create a linked guard/handle pair.
///
/// The guard lives inside the owning task; the handle goes to the streams
/// that task owns. When the guard is dropped (the task returns, panics or is
/// aborted) every handle reports the owner as down.
pub fn owner() -> (OwnerGuard, OwnerHandle) {
    let token = CancellationToken::new();
    let handle = OwnerHandle {
        token: token.clone(),
    };
    (
        OwnerGuard {
            token: token.clone(),
            _guard: token.drop_guard(),
        },
        handle,
    )
}

/// Held by the owner for as long as it is alive.
pub struct OwnerGuard {
    token: CancellationToken,
    _guard: DropGuard,
}

impl OwnerGuard {
    /// Another handle observing this owner.
    pub fn handle(&self) -> OwnerHandle {
        OwnerHandle {
            token: self.token.clone(),
        }
    }
}

impl std::fmt::Debug for OwnerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerGuard").finish_non_exhaustive()
    }
}

/// Observes whether an owner is still alive.
#[derive(Debug, Clone)]
pub struct OwnerHandle {
    token: CancellationToken,
}

impl OwnerHandle {
    pub fn is_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once the owner's guard is dropped.
    pub async fn down(&self) {
        self.token.cancelled().await;
    }
}

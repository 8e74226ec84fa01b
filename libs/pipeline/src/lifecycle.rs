use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Relay lifecycle. Transitions only move forward:
/// `Running → Draining → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Running => f.write_str("running"),
            LifecycleState::Draining => f.write_str("draining"),
            LifecycleState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Owns the cancellation signal and the observable lifecycle state.
///
/// Cloning shares the same token and state.
#[derive(Clone)]
pub struct Lifecycle {
    token: CancellationToken,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Running);
        Self { token: CancellationToken::new(), state: Arc::new(state) }
    }

    /// Request shutdown: enter `Draining` and cancel the token. Idempotent.
    pub fn shutdown(&self) {
        self.begin_draining();
        self.token.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Wait until the relay reports `Stopped`.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        // Sender lives in self, so the channel cannot close while we wait.
        let _ = rx.wait_for(|s| *s == LifecycleState::Stopped).await;
    }

    pub(crate) fn begin_draining(&self) -> bool {
        self.advance(LifecycleState::Draining)
    }

    pub(crate) fn mark_stopped(&self) -> bool {
        self.advance(LifecycleState::Stopped)
    }

    fn advance(&self, next: LifecycleState) -> bool {
        let advanced = self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
        if advanced {
            tracing::info!(state = %next, "lifecycle transition");
        }
        advanced
    }
}

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, Span};

/// Logging context handed to the pipeline at construction time.
///
/// The pipeline never reads the process-wide default subscriber: every task
/// it spawns runs under `dispatch`, inside a span naming the relay and the
/// component.
#[derive(Clone)]
pub struct LogContext {
    dispatch: Dispatch,
    relay: String,
}

impl LogContext {
    pub fn new(dispatch: Dispatch, relay: impl Into<String>) -> Self {
        Self { dispatch, relay: relay.into() }
    }

    /// Context that discards every event. Handy in tests.
    pub fn disabled(relay: impl Into<String>) -> Self {
        Self::new(Dispatch::none(), relay)
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn relay(&self) -> &str {
        &self.relay
    }

    pub fn span(&self, component: &'static str) -> Span {
        tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::info_span!("relay", relay = %self.relay, component)
        })
    }

    /// Spawn `fut` on the runtime under this context.
    pub fn spawn<F>(&self, component: &'static str, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let span = self.span(component);
        tokio::spawn(fut.instrument(span).with_subscriber(self.dispatch.clone()))
    }
}

impl std::fmt::Debug for LogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogContext").field("relay", &self.relay).finish_non_exhaustive()
    }
}

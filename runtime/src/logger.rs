//! Logging middleware.
//!
//! Logs every action before handing it to the next dispatcher and the
//! current state once that call returns. It never changes what gets
//! dispatched.

use flow_core::dispatcher::{DispatcherRef, intercept};
use flow_core::middleware::Middleware;
use flow_core::state::StateHolderRef;
use std::fmt::Debug;
use tracing::Level;

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!(target: "flow::logger", $($arg)+),
            Level::WARN => tracing::warn!(target: "flow::logger", $($arg)+),
            Level::INFO => tracing::info!(target: "flow::logger", $($arg)+),
            Level::DEBUG => tracing::debug!(target: "flow::logger", $($arg)+),
            _ => tracing::trace!(target: "flow::logger", $($arg)+),
        }
    };
}

/// Middleware that traces each action and the state observed afterwards
///
/// Dispatch into the store is asynchronous, so the state logged after
/// forwarding is whatever was committed at that moment, which may not yet
/// include the action just forwarded.
///
/// # Example
///
/// ```ignore
/// use flow_runtime::{LoggingMiddleware, with_middleware};
/// use std::sync::Arc;
///
/// let store = with_middleware(vec![Arc::new(LoggingMiddleware::new())])
///     .create_store(AppState::default(), AppReducer);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LoggingMiddleware {
    level: Level,
}

impl LoggingMiddleware {
    /// Log at `DEBUG`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            level: Level::DEBUG,
        }
    }

    /// Log at the given level instead
    #[must_use]
    pub const fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// The level this middleware logs at
    #[must_use]
    pub const fn level(&self) -> Level {
        self.level
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> Middleware<S, A> for LoggingMiddleware
where
    S: Debug + Send + Sync + 'static,
    A: Debug + Send + 'static,
{
    fn apply(&self, state: StateHolderRef<S>, next: DispatcherRef<A>) -> DispatcherRef<A> {
        let level = self.level;
        intercept(next, move |next, action: A| {
            log_at!(level, action = ?action, "action -->");
            next.dispatch(action);
            log_at!(level, state = ?state.state(), "state <--");
        })
    }
}

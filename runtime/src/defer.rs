//! Deferred dispatch for middleware.
//!
//! A deferred action re-enters the chain through `next` once its delay has
//! elapsed and is ordered by its arrival at the action channel, not by the
//! action that scheduled it. If the store behind `next` is dropped first,
//! the timer is abandoned and the action never fires.

use flow_core::dispatcher::DispatcherRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Dispatch `action` through `next` after `delay`
///
/// The wait happens on a spawned task; the caller is never blocked and no
/// lock is held while waiting. The returned handle may be aborted to cancel
/// the dispatch.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
///
/// # Example
///
/// ```ignore
/// use flow_core::dispatcher::intercept;
/// use flow_runtime::defer;
///
/// intercept(next, |next, action| {
///     if matches!(action, CountAction::StartIncrement) {
///         defer(next, Duration::from_secs(2), CountAction::Increment);
///     }
///     next.dispatch(action);
/// })
/// ```
pub fn defer<A>(next: &DispatcherRef<A>, delay: Duration, action: A) -> JoinHandle<()>
where
    A: Send + 'static,
{
    let next = Arc::clone(next);
    let closed = next.closed();

    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(delay) => {
                tracing::trace!(delay_ms = delay.as_millis(), "Deferred action firing");
                next.dispatch(action);
            },
            () = closed => {
                tracing::debug!("Store dropped before deferred action fired, discarding");
            },
        }
    })
}

//! # Counter Example
//!
//! A counter whose increments arrive from a simulated slow service.
//!
//! This example showcases:
//! - A pure reducer over a small state
//! - A middleware that forwards an action and schedules a follow-up
//! - Observing committed states through the change stream
//!
//! ## Flow
//!
//! 1. The user dispatches `StartIncrement`
//! 2. `CountServiceMiddleware` forwards it, so the store commits `loading = true`
//! 3. After the service delay the middleware dispatches `Increment`
//! 4. The store commits `count + 1` with `loading = false`
//!
//! ## Example
//!
//! ```no_run
//! use counter::{CountAction, counter_store};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let store = counter_store(Duration::from_secs(2));
//! let mut changes = store.subscribe();
//!
//! store.dispatch(CountAction::StartIncrement);
//! assert!(changes.recv().await.unwrap().loading);
//! assert_eq!(changes.recv().await.unwrap().count, 1);
//! # }
//! ```

use flow_core::dispatcher::{DispatcherRef, intercept};
use flow_core::middleware::{Middleware, MiddlewareRef};
use flow_core::reducer::Reducer;
use flow_core::state::StateHolderRef;
use flow_runtime::{LoggingMiddleware, Store, StoreConfig, defer, with_middleware};
use std::sync::Arc;
use std::time::Duration;

/// Counter state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountState {
    /// Current count value
    pub count: i64,
    /// Whether an increment has been requested but not yet delivered
    pub loading: bool,
}

/// Counter actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountAction {
    /// Ask the service for an increment
    StartIncrement,
    /// The service delivered an increment
    Increment,
}

/// Reducer for the counter
#[derive(Debug, Clone, Copy, Default)]
pub struct CountReducer;

impl CountReducer {
    /// Create a new counter reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for CountReducer {
    type State = CountState;
    type Action = CountAction;

    fn reduce(&self, state: &CountState, action: CountAction) -> CountState {
        match action {
            CountAction::StartIncrement => CountState {
                loading: true,
                ..*state
            },
            CountAction::Increment => CountState {
                count: state.count + 1,
                loading: false,
            },
        }
    }
}

/// Simulates a remote counter service
///
/// Every `StartIncrement` is forwarded unchanged and answered with an
/// `Increment` once `delay` has elapsed.
#[derive(Debug, Clone, Copy)]
pub struct CountServiceMiddleware {
    delay: Duration,
}

impl CountServiceMiddleware {
    /// Default service latency
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

    /// A service that answers after `delay`
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// The configured service latency
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for CountServiceMiddleware {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DELAY)
    }
}

impl Middleware<CountState, CountAction> for CountServiceMiddleware {
    fn apply(
        &self,
        _state: StateHolderRef<CountState>,
        next: DispatcherRef<CountAction>,
    ) -> DispatcherRef<CountAction> {
        let delay = self.delay;
        intercept(next, move |next, action| {
            if action == CountAction::StartIncrement {
                tracing::debug!(delay_ms = delay.as_millis(), "Increment requested from service");
                defer(next, delay, CountAction::Increment);
            }
            next.dispatch(action);
        })
    }
}

/// Build the counter store: logging, then the service, then the reducer
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
#[must_use]
pub fn counter_store(delay: Duration) -> Store<CountState, CountAction> {
    let middleware: Vec<MiddlewareRef<CountState, CountAction>> = vec![
        Arc::new(LoggingMiddleware::new()),
        Arc::new(CountServiceMiddleware::new(delay)),
    ];

    with_middleware(middleware)
        .with_config(StoreConfig::default().with_name("counter"))
        .create_store(CountState::default(), CountReducer::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_testing::{ReducerTest, assertions};
    use proptest::prelude::*;

    #[test]
    fn test_start_increment_sets_loading() {
        ReducerTest::new(CountReducer::new())
            .given_state(CountState::default())
            .when_action(CountAction::StartIncrement)
            .then_state(|state| {
                assert_eq!(state.count, 0);
                assert!(state.loading);
            })
            .run();
    }

    #[test]
    fn test_increment_clears_loading() {
        ReducerTest::new(CountReducer::new())
            .given_state(CountState {
                count: 4,
                loading: true,
            })
            .when_action(CountAction::Increment)
            .then_state(|state| {
                assert_eq!(*state, CountState {
                    count: 5,
                    loading: false,
                });
            })
            .run();
    }

    #[test]
    fn test_repeated_start_is_idempotent() {
        assertions::assert_unchanged(
            &CountReducer::new(),
            &CountState {
                count: 2,
                loading: true,
            },
            CountAction::StartIncrement,
        );
    }

    #[test]
    fn test_default_service_delay() {
        assert_eq!(
            CountServiceMiddleware::default().delay(),
            Duration::from_secs(2)
        );
    }

    fn action() -> impl Strategy<Value = CountAction> {
        prop_oneof![
            Just(CountAction::StartIncrement),
            Just(CountAction::Increment)
        ]
    }

    proptest! {
        #[test]
        fn count_equals_number_of_increments(actions in prop::collection::vec(action(), 0..100)) {
            let increments = actions
                .iter()
                .filter(|a| **a == CountAction::Increment)
                .count();
            let state = actions
                .into_iter()
                .fold(CountState::default(), |state, action| CountReducer.reduce(&state, action));

            prop_assert_eq!(state.count, i64::try_from(increments).unwrap_or(i64::MAX));
        }
    }
}

//! # Flow Testing
//!
//! Testing utilities and helpers for the Flow state container.
//!
//! This crate provides:
//! - A Given-When-Then builder for reducers
//! - A recorder that collects every state a store publishes
//! - Middleware that records or suppresses actions
//! - A tracing setup that writes through the test harness
//!
//! ## Example
//!
//! ```ignore
//! use flow_testing::{ChangeRecorder, init_test_tracing};
//! use flow_runtime::Store;
//!
//! #[tokio::test]
//! async fn test_counter_flow() {
//!     init_test_tracing();
//!     let store = Store::new(CountState::default(), CountReducer);
//!     let recorder = ChangeRecorder::attach(&store);
//!
//!     store.dispatch(CountAction::Increment);
//!
//!     let states = recorder.wait_for(1).await;
//!     assert_eq!(states[0].count, 1);
//! }
//! ```


pub use reducer_test::{ReducerTest, assertions};

/// Test doubles for stores and middleware chains
///
/// Recording and suppressing middleware, plus a collector for the change
/// stream.
pub mod mocks {
    use flow_core::dispatcher::{DispatcherRef, intercept};
    use flow_core::middleware::Middleware;
    use flow_core::state::StateHolderRef;
    use flow_runtime::{Store, Subscription};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use tokio::sync::watch;
    use tokio::task::JoinHandle;

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Collects every state published on a subscription
    ///
    /// Recording happens on a background task, which stops when the
    /// recorder is dropped.
    pub struct ChangeRecorder<S> {
        seen: Arc<Mutex<Vec<Arc<S>>>>,
        count: watch::Receiver<usize>,
        task: JoinHandle<()>,
    }

    impl<S> ChangeRecorder<S>
    where
        S: Send + Sync + 'static,
    {
        /// Start recording from an existing subscription
        ///
        /// # Panics
        ///
        /// Panics if called outside a Tokio runtime.
        #[must_use]
        pub fn new(mut subscription: Subscription<S>) -> Self {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let (tx, count) = watch::channel(0);

            let task = {
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    while let Some(state) = subscription.recv().await {
                        let len = {
                            let mut seen = lock(&seen);
                            seen.push(state);
                            seen.len()
                        };
                        let _ = tx.send(len);
                    }
                })
            };

            Self { seen, count, task }
        }

        /// Subscribe to `store` and start recording
        ///
        /// Only states committed after this call are recorded.
        #[must_use]
        pub fn attach<A>(store: &Store<S, A>) -> Self
        where
            A: Send + 'static,
        {
            Self::new(store.subscribe())
        }

        /// Wait until at least `n` states have been recorded
        ///
        /// Returns everything recorded so far.
        ///
        /// # Panics
        ///
        /// Panics if the change stream ends before `n` states arrive.
        #[allow(clippy::panic)] // Test helper
        pub async fn wait_for(&self, n: usize) -> Vec<Arc<S>> {
            let mut count = self.count.clone();
            if count.wait_for(|len| *len >= n).await.is_err() {
                panic!(
                    "Change stream ended after {} states, expected {n}",
                    self.len()
                );
            }
            self.recorded()
        }

        /// Everything recorded so far
        #[must_use]
        pub fn recorded(&self) -> Vec<Arc<S>> {
            lock(&self.seen).clone()
        }

        /// Number of states recorded so far
        #[must_use]
        pub fn len(&self) -> usize {
            lock(&self.seen).len()
        }

        /// Whether nothing has been recorded yet
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl<S> Drop for ChangeRecorder<S> {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    /// Shared log of actions seen by labelled middleware
    ///
    /// Several [`RecordingMiddleware`] can write into one log, which makes
    /// the order in which a chain visits them observable.
    #[derive(Debug)]
    pub struct ActionLog<A> {
        entries: Arc<Mutex<Vec<(&'static str, A)>>>,
    }

    impl<A: Clone> ActionLog<A> {
        /// An empty log
        #[must_use]
        pub fn new() -> Self {
            Self {
                entries: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Every entry in the order it was recorded
        #[must_use]
        pub fn entries(&self) -> Vec<(&'static str, A)> {
            lock(&self.entries).clone()
        }

        /// The actions recorded under `label`, in order
        #[must_use]
        pub fn seen_by(&self, label: &str) -> Vec<A> {
            lock(&self.entries)
                .iter()
                .filter(|(l, _)| *l == label)
                .map(|(_, action)| action.clone())
                .collect()
        }

        fn push(&self, label: &'static str, action: A) {
            lock(&self.entries).push((label, action));
        }
    }

    impl<A: Clone> Default for ActionLog<A> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<A> Clone for ActionLog<A> {
        fn clone(&self) -> Self {
            Self {
                entries: Arc::clone(&self.entries),
            }
        }
    }

    /// Middleware that records every action it sees, then forwards it
    #[derive(Debug, Clone)]
    pub struct RecordingMiddleware<A> {
        label: &'static str,
        log: ActionLog<A>,
    }

    impl<A: Clone> RecordingMiddleware<A> {
        /// Record into a fresh log under `label`
        #[must_use]
        pub fn new(label: &'static str) -> Self {
            Self::with_log(label, &ActionLog::new())
        }

        /// Record into a shared log under `label`
        #[must_use]
        pub fn with_log(label: &'static str, log: &ActionLog<A>) -> Self {
            Self {
                label,
                log: log.clone(),
            }
        }

        /// The log this middleware writes to
        #[must_use]
        pub fn log(&self) -> ActionLog<A> {
            self.log.clone()
        }
    }

    impl<S, A> Middleware<S, A> for RecordingMiddleware<A>
    where
        A: Clone + Send + 'static,
    {
        fn apply(&self, _state: StateHolderRef<S>, next: DispatcherRef<A>) -> DispatcherRef<A> {
            let label = self.label;
            let log = self.log.clone();
            intercept(next, move |next, action: A| {
                log.push(label, action.clone());
                next.dispatch(action);
            })
        }
    }

    /// Middleware that drops every action matching a predicate
    pub struct SuppressMiddleware<F> {
        predicate: Arc<F>,
    }

    impl<F> SuppressMiddleware<F> {
        /// Drop actions for which `predicate` returns `true`
        #[must_use]
        pub fn new(predicate: F) -> Self {
            Self {
                predicate: Arc::new(predicate),
            }
        }
    }

    impl<S, A, F> Middleware<S, A> for SuppressMiddleware<F>
    where
        A: 'static,
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        fn apply(&self, _state: StateHolderRef<S>, next: DispatcherRef<A>) -> DispatcherRef<A> {
            let predicate = Arc::clone(&self.predicate);
            intercept(next, move |next, action: A| {
                if !predicate(&action) {
                    next.dispatch(action);
                }
            })
        }
    }

    impl<F> std::fmt::Debug for SuppressMiddleware<F> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SuppressMiddleware").finish_non_exhaustive()
        }
    }
}

/// Install a tracing subscriber that writes through the test harness
///
/// Honors `RUST_LOG` and defaults to `warn`. Safe to call from every test;
/// only the first call installs anything.
pub fn init_test_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

// Re-export commonly used items
pub use mocks::{ActionLog, ChangeRecorder, RecordingMiddleware, SuppressMiddleware};

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests can unwrap

    use super::*;
    use flow_core::dispatcher::dispatcher_fn;
    use flow_core::middleware::{MiddlewareRef, compose};
    use flow_core::state::state_fn;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_recording_order_across_chain() {
        let log = ActionLog::new();
        let chain: Vec<MiddlewareRef<(), u32>> = vec![
            Arc::new(RecordingMiddleware::with_log("outer", &log)),
            Arc::new(RecordingMiddleware::with_log("inner", &log)),
        ];
        let head = compose(&chain, &state_fn(|| Arc::new(())), dispatcher_fn(|_: u32| {}));

        head.dispatch(1);
        head.dispatch(2);

        assert_eq!(
            log.entries(),
            vec![("outer", 1), ("inner", 1), ("outer", 2), ("inner", 2)]
        );
        assert_eq!(log.seen_by("inner"), vec![1, 2]);
    }

    #[test]
    fn test_suppress_drops_matching_actions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            dispatcher_fn(move |n: u32| seen.lock().unwrap().push(n))
        };
        let chain: Vec<MiddlewareRef<(), u32>> =
            vec![Arc::new(SuppressMiddleware::new(|n: &u32| n % 2 == 0))];
        let head = compose(&chain, &state_fn(|| Arc::new(())), sink);

        for n in 1..=5 {
            head.dispatch(n);
        }

        assert_eq!(*seen.lock().unwrap(), vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_recorder_collects_store_changes() {
        init_test_tracing();
        let store = flow_runtime::Store::new(
            0_u32,
            flow_core::reducer_fn(|state: &u32, n: u32| state + n),
        );
        let recorder = ChangeRecorder::attach(&store);
        assert!(recorder.is_empty());

        store.dispatch(1);
        store.dispatch(2);

        let states: Vec<u32> = recorder.wait_for(2).await.iter().map(|s| **s).collect();
        assert_eq!(states, vec![1, 3]);
    }
}

//! # Flow Runtime
//!
//! Runtime implementation for the Flow state container.
//!
//! This crate provides the Store that owns the single state cell, serializes
//! every transition onto one action channel, and notifies observers of each
//! committed state.
//!
//! ## Core Components
//!
//! - **Store**: Owns the state cell and exposes dispatch, state and changes
//! - **Action Channel**: Unbounded queue drained by a single consumer task
//! - **Change Stream**: One buffered queue per subscriber, never blocking the store
//! - **Store Creator**: Wraps the channel dispatcher in a middleware chain
//!
//! ## Example
//!
//! ```ignore
//! use flow_runtime::{LoggingMiddleware, with_middleware};
//! use std::sync::Arc;
//!
//! let store = with_middleware(vec![Arc::new(LoggingMiddleware::new())])
//!     .create_store(initial_state, my_reducer);
//!
//! let mut changes = store.subscribe();
//!
//! // Fire and forget
//! store.dispatch(Action::DoSomething);
//!
//! // Observe the committed result
//! let next = changes.recv().await;
//! let current = store.state();
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Change stream and subscriptions
pub mod changes;

/// Deferred dispatch for middleware
pub mod defer;

/// Logging middleware
pub mod logger;

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur around Store operations
    ///
    /// Dispatch itself never fails. These errors cover construction,
    /// configuration and waiting for the store to settle.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// No Tokio runtime is available to drive the store
        ///
        /// Returned by `try_new` and `try_create_store` when called outside
        /// a runtime context.
        #[error("No Tokio runtime available to drive the store")]
        NoRuntime,

        /// The store stopped accepting actions before settling
        ///
        /// This happens after a reducer or middleware panic.
        #[error("Store halted with {0} actions still pending")]
        Halted(usize),

        /// Timeout waiting for the store to settle
        #[error("Timeout waiting for store to settle")]
        Timeout,

        /// A configuration value could not be parsed
        #[error("Invalid value {value:?} for {key}")]
        Config {
            /// Environment variable name
            key: &'static str,
            /// Raw value that failed to parse
            value: String,
        },
    }
}

pub use error::StoreError;

/// Health check status levels
///
/// Indicates the current health state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Store is fully operational
    Healthy,

    /// Store is operational but a subscriber is falling behind
    Degraded,

    /// Store has stopped processing actions
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is degraded
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a store
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the store being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,

    /// Metadata such as pending actions and subscriber counts
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Look up a metadata value by key
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Configuration for Store instances
///
/// # Example
///
/// ```
/// use flow_runtime::StoreConfig;
///
/// let config = StoreConfig::default()
///     .with_name("counter")
///     .with_backlog_warning(64);
///
/// assert_eq!(config.name, "counter");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Name used in spans, health checks and metric labels
    pub name: String,
    /// Per-subscriber backlog that triggers a warning (never a drop)
    pub backlog_warning: usize,
    /// Whether the store records metrics
    pub metrics: bool,
}

impl StoreConfig {
    /// Environment variable holding the store name
    pub const ENV_NAME: &'static str = "FLOW_STORE_NAME";
    /// Environment variable holding the backlog warning threshold
    pub const ENV_BACKLOG_WARNING: &'static str = "FLOW_BACKLOG_WARNING";
    /// Environment variable toggling metrics (`true`/`false`)
    pub const ENV_METRICS: &'static str = "FLOW_METRICS";

    /// Create a new configuration with custom values
    #[must_use]
    pub fn new(name: impl Into<String>, backlog_warning: usize, metrics: bool) -> Self {
        Self {
            name: name.into(),
            backlog_warning,
            metrics,
        }
    }

    /// Load configuration from environment variables
    ///
    /// Unset variables fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if a value is present but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let name = lookup(Self::ENV_NAME).unwrap_or(defaults.name);
        let backlog_warning = parse(&lookup, Self::ENV_BACKLOG_WARNING)?
            .unwrap_or(defaults.backlog_warning);
        let metrics = parse(&lookup, Self::ENV_METRICS)?.unwrap_or(defaults.metrics);

        Ok(Self {
            name,
            backlog_warning,
            metrics,
        })
    }

    /// Set the store name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the backlog warning threshold
    #[must_use]
    pub const fn with_backlog_warning(mut self, backlog: usize) -> Self {
        self.backlog_warning = backlog;
        self
    }

    /// Enable or disable metrics
    #[must_use]
    pub const fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            backlog_warning: 1024,
            metrics: true,
        }
    }
}

fn parse<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, StoreError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| StoreError::Config { key, value })
        })
        .transpose()
}

/// Store module - The runtime for reducers
///
/// Store runtime coordinating the action channel, the reducer and the
/// change stream.
pub mod store {
    use super::{Arc, Duration, HealthCheck, StoreConfig, StoreError};
    use crate::changes::{ChangeStream, Listener, Subscription};
    use crate::metrics::StoreMetrics;
    use flow_core::dispatcher::{Dispatcher, DispatcherRef};
    use flow_core::middleware::{Middleware, MiddlewareRef, compose};
    use flow_core::reducer::Reducer;
    use flow_core::state::{StateHolder, StateHolderRef};
    use futures::future::BoxFuture;
    use std::any::Any;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::{PoisonError, RwLock};
    use tokio::runtime::Handle;
    use tokio::sync::{mpsc, oneshot, watch};
    use tracing::Instrument;

    /// The single state cell owned by a store
    ///
    /// Replacement swaps an `Arc`, so readers observe either the previous or
    /// the newly committed value, never a partial one.
    struct StateCell<S> {
        value: RwLock<Arc<S>>,
    }

    impl<S> StateCell<S> {
        fn new(initial: S) -> Self {
            Self {
                value: RwLock::new(Arc::new(initial)),
            }
        }

        fn commit(&self, next: Arc<S>) {
            *self.value.write().unwrap_or_else(PoisonError::into_inner) = next;
        }
    }

    impl<S: Send + Sync> StateHolder<S> for StateCell<S> {
        fn state(&self) -> Arc<S> {
            Arc::clone(&self.value.read().unwrap_or_else(PoisonError::into_inner))
        }
    }

    /// Progress of the consumer task, shared with `settled()` waiters
    #[derive(Debug, Clone, Copy, Default)]
    struct Progress {
        pending: usize,
        halted: bool,
    }

    /// What the consumer task receives
    enum Command<A> {
        Reduce(A),
        /// A middleware panicked; stop after the actions queued before it
        Halt,
    }

    /// Innermost dispatcher: pushes actions onto the channel
    struct ChannelDispatcher<A> {
        tx: mpsc::UnboundedSender<Command<A>>,
        progress: Arc<watch::Sender<Progress>>,
        metrics: StoreMetrics,
    }

    impl<A> ChannelDispatcher<A> {
        fn discard(&self) {
            self.metrics.record_discard();
            tracing::warn!("Store has stopped, action discarded");
        }
    }

    impl<A: Send + 'static> Dispatcher<A> for ChannelDispatcher<A> {
        fn dispatch(&self, action: A) {
            if self.progress.borrow().halted {
                self.discard();
                return;
            }

            // Counted before sending so `settled()` cannot miss it
            self.progress.send_modify(|p| p.pending += 1);

            if self.tx.send(Command::Reduce(action)).is_err() {
                self.progress.send_modify(|p| p.pending -= 1);
                self.discard();
                return;
            }

            self.metrics.record_dispatch();
        }

        fn closed(&self) -> BoxFuture<'static, ()> {
            let tx = self.tx.clone();
            Box::pin(async move { tx.closed().await })
        }
    }

    /// Stops the store after a middleware panic
    struct Halt<A> {
        tx: mpsc::UnboundedSender<Command<A>>,
        progress: Arc<watch::Sender<Progress>>,
    }

    impl<A> Halt<A> {
        fn trigger(&self, payload: &(dyn Any + Send)) {
            let first = self
                .progress
                .send_if_modified(|p| !std::mem::replace(&mut p.halted, true));
            if !first {
                return;
            }

            let reason = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            tracing::error!(reason, "Middleware panicked, store halting");
            let _ = self.tx.send(Command::Halt);
        }
    }

    impl<A> Clone for Halt<A> {
        fn clone(&self) -> Self {
            Self {
                tx: self.tx.clone(),
                progress: Arc::clone(&self.progress),
            }
        }
    }

    /// Wraps one middleware so a panic inside it halts the store instead of
    /// unwinding into whoever dispatched
    struct Guarded<S, A> {
        middleware: MiddlewareRef<S, A>,
        halt: Halt<A>,
    }

    impl<S, A> Middleware<S, A> for Guarded<S, A>
    where
        S: 'static,
        A: Send + 'static,
    {
        fn apply(&self, state: StateHolderRef<S>, next: DispatcherRef<A>) -> DispatcherRef<A> {
            Arc::new(GuardedDispatcher {
                inner: self.middleware.apply(state, next),
                halt: self.halt.clone(),
            })
        }
    }

    struct GuardedDispatcher<A> {
        inner: DispatcherRef<A>,
        halt: Halt<A>,
    }

    impl<A: Send + 'static> Dispatcher<A> for GuardedDispatcher<A> {
        fn dispatch(&self, action: A) {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.inner.dispatch(action))) {
                self.halt.trigger(payload.as_ref());
            }
        }

        fn closed(&self) -> BoxFuture<'static, ()> {
            self.inner.closed()
        }
    }

    /// Marks the consumer as halted when its task ends, including on panic
    struct HaltGuard(Arc<watch::Sender<Progress>>);

    impl Drop for HaltGuard {
        fn drop(&mut self) {
            self.0.send_modify(|p| p.halted = true);
        }
    }

    /// The consumer loop: one action at a time, reduce, commit, publish
    async fn run<R, S, A>(
        reducer: R,
        cell: Arc<StateCell<S>>,
        changes: ChangeStream<S>,
        mut actions: mpsc::UnboundedReceiver<Command<A>>,
        mut shutdown: oneshot::Receiver<()>,
        progress: Arc<watch::Sender<Progress>>,
        metrics: StoreMetrics,
    ) where
        R: Reducer<State = S, Action = A>,
        S: Send + Sync,
    {
        let _halt = HaltGuard(Arc::clone(&progress));
        tracing::debug!("Store consumer started");

        loop {
            let action = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::debug!("Store dropped, consumer stopping");
                    break;
                },
                command = actions.recv() => match command {
                    Some(Command::Reduce(action)) => action,
                    Some(Command::Halt) => {
                        tracing::error!("Consumer stopping after middleware panic");
                        break;
                    },
                    None => break,
                },
            };

            let current = cell.state();

            let span = tracing::trace_span!("reducer_execution");
            let next = span.in_scope(|| {
                let start = std::time::Instant::now();
                let next = Arc::new(reducer.reduce(&current, action));
                metrics.record_reduction(start.elapsed());
                next
            });

            // Committed under the registry lock so a concurrent subscribe
            // never receives the value that was current when it subscribed
            let delivered = changes.publish(&next, || cell.commit(Arc::clone(&next)));
            progress.send_modify(|p| p.pending = p.pending.saturating_sub(1));

            tracing::trace!(subscribers = delivered, "State committed and published");
        }

        tracing::debug!("Store consumer stopped");
    }

    struct StoreInner<S, A> {
        cell: Arc<StateCell<S>>,
        dispatcher: DispatcherRef<A>,
        changes: ChangeStream<S>,
        progress: watch::Receiver<Progress>,
        runtime: Handle,
        config: StoreConfig,
        // Dropping this stops the consumer and abandons deferred dispatches
        _shutdown: oneshot::Sender<()>,
    }

    /// The Store - owner of the state cell
    ///
    /// The Store holds:
    /// 1. State (one `Arc` swapped atomically on every commit)
    /// 2. The head of the middleware chain (the public dispatcher)
    /// 3. The change stream
    ///
    /// The reducer lives on a single consumer task, so reductions never run
    /// concurrently. Cloning a Store yields another handle onto the same
    /// cell; once every handle is dropped the consumer stops.
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = Store::new(CountState::default(), CountReducer);
    ///
    /// store.dispatch(CountAction::Increment);
    /// store.settled().await?;
    ///
    /// assert_eq!(store.state().count, 1);
    /// ```
    pub struct Store<S, A> {
        inner: Arc<StoreInner<S, A>>,
    }

    impl<S, A> Store<S, A>
    where
        S: Send + Sync + 'static,
        A: Send + 'static,
    {
        /// Create a new store with initial state and reducer
        ///
        /// Uses the default [`StoreConfig`] and no middleware.
        ///
        /// # Panics
        ///
        /// Panics if called outside a Tokio runtime. Use [`Store::try_new`]
        /// to get an error instead.
        #[must_use]
        pub fn new<R>(initial_state: S, reducer: R) -> Self
        where
            R: Reducer<State = S, Action = A> + Send + 'static,
        {
            StoreCreator::new().create_store(initial_state, reducer)
        }

        /// Create a new store with custom configuration
        ///
        /// # Panics
        ///
        /// Panics if called outside a Tokio runtime.
        #[must_use]
        pub fn with_config<R>(initial_state: S, reducer: R, config: StoreConfig) -> Self
        where
            R: Reducer<State = S, Action = A> + Send + 'static,
        {
            StoreCreator::new()
                .with_config(config)
                .create_store(initial_state, reducer)
        }

        /// Create a new store, failing if no Tokio runtime is available
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::NoRuntime`] outside a runtime context.
        pub fn try_new<R>(initial_state: S, reducer: R) -> Result<Self, StoreError>
        where
            R: Reducer<State = S, Action = A> + Send + 'static,
        {
            StoreCreator::new().try_create_store(initial_state, reducer)
        }

        fn build<R>(
            runtime: Handle,
            initial_state: S,
            reducer: R,
            config: StoreConfig,
            middleware: &[MiddlewareRef<S, A>],
        ) -> Self
        where
            R: Reducer<State = S, Action = A> + Send + 'static,
        {
            let metrics = StoreMetrics::new(&config.name, config.metrics);
            let cell = Arc::new(StateCell::new(initial_state));
            let changes = ChangeStream::new(config.backlog_warning, metrics.clone());
            let (tx, rx) = mpsc::unbounded_channel();
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let (progress_tx, progress_rx) = watch::channel(Progress::default());
            let progress_tx = Arc::new(progress_tx);

            let span = tracing::info_span!("flow_store", store = %config.name);
            runtime.spawn(
                run(
                    reducer,
                    Arc::clone(&cell),
                    changes.clone(),
                    rx,
                    shutdown_rx,
                    Arc::clone(&progress_tx),
                    metrics.clone(),
                )
                .instrument(span),
            );

            let halt = Halt {
                tx: tx.clone(),
                progress: Arc::clone(&progress_tx),
            };
            let raw: DispatcherRef<A> = Arc::new(ChannelDispatcher {
                tx,
                progress: progress_tx,
                metrics,
            });
            let guarded: Vec<MiddlewareRef<S, A>> = middleware
                .iter()
                .map(|m| {
                    Arc::new(Guarded {
                        middleware: Arc::clone(m),
                        halt: halt.clone(),
                    }) as MiddlewareRef<S, A>
                })
                .collect();
            let holder: StateHolderRef<S> = Arc::clone(&cell) as StateHolderRef<S>;
            let dispatcher = compose(&guarded, &holder, raw);

            tracing::debug!(
                store = %config.name,
                middleware = middleware.len(),
                "Store created"
            );

            Self {
                inner: Arc::new(StoreInner {
                    cell,
                    dispatcher,
                    changes,
                    progress: progress_rx,
                    runtime,
                    config,
                    _shutdown: shutdown_tx,
                }),
            }
        }

        /// Dispatch an action through the middleware chain
        ///
        /// Returns as soon as the action has been handed on. Reduction and
        /// change notification happen later on the consumer task. Never
        /// panics: a panicking middleware halts the store instead.
        pub fn dispatch(&self, action: A) {
            self.inner.dispatcher.dispatch(action);
        }

        /// The head of the middleware chain as a shareable dispatcher
        #[must_use]
        pub fn dispatcher(&self) -> DispatcherRef<A> {
            Arc::clone(&self.inner.dispatcher)
        }

        /// The most recently committed state
        #[must_use]
        pub fn state(&self) -> Arc<S> {
            self.inner.cell.state()
        }

        /// A live read accessor onto the state cell
        #[must_use]
        pub fn state_holder(&self) -> StateHolderRef<S> {
            Arc::clone(&self.inner.cell) as StateHolderRef<S>
        }

        /// The change stream of this store
        #[must_use]
        pub fn changes(&self) -> ChangeStream<S> {
            self.inner.changes.clone()
        }

        /// Subscribe to states committed from now on
        #[must_use]
        pub fn subscribe(&self) -> Subscription<S> {
            self.inner.changes.subscribe()
        }

        /// Call `on_next` with every state committed from now on
        ///
        /// The callback runs on its own task, so a slow callback only
        /// delays itself. The subscription is registered before this returns.
        pub fn subscribe_to_changes<F>(&self, mut on_next: F) -> Listener
        where
            F: FnMut(Arc<S>) + Send + 'static,
        {
            let mut subscription = self.subscribe();
            let task = self.inner.runtime.spawn(async move {
                while let Some(state) = subscription.recv().await {
                    on_next(state);
                }
            });
            Listener::new(task)
        }

        /// Number of dispatched actions not yet committed
        #[must_use]
        pub fn pending(&self) -> usize {
            self.inner.progress.borrow().pending
        }

        /// Whether the store has stopped accepting actions
        ///
        /// Set after a reducer or middleware panic.
        #[must_use]
        pub fn is_halted(&self) -> bool {
            self.inner.progress.borrow().halted
        }

        /// Wait until every action dispatched so far has been committed
        ///
        /// Deferred dispatches that have not fired yet are not counted.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::Halted`] if the store halted (after a reducer
        /// or middleware panic) before every action was committed.
        pub async fn settled(&self) -> Result<(), StoreError> {
            let mut progress = self.inner.progress.clone();
            let snapshot = progress
                .wait_for(|p| p.pending == 0 || p.halted)
                .await
                .map(|p| *p)
                .unwrap_or(Progress {
                    pending: self.pending(),
                    halted: true,
                });

            if snapshot.halted {
                return Err(StoreError::Halted(snapshot.pending));
            }
            Ok(())
        }

        /// Wait for [`Store::settled`] with a timeout
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::Timeout`] if the timeout elapses first, or
        /// [`StoreError::Halted`] as for `settled`.
        pub async fn settled_with_timeout(&self, timeout: Duration) -> Result<(), StoreError> {
            tokio::time::timeout(timeout, self.settled())
                .await
                .map_err(|_| StoreError::Timeout)?
        }

        /// The configuration this store was built with
        #[must_use]
        pub fn config(&self) -> &StoreConfig {
            &self.inner.config
        }

        /// Perform a health check on the Store
        ///
        /// - Unhealthy once the store has halted
        /// - Degraded while any subscriber backlog is at or above `backlog_warning`
        /// - Healthy otherwise
        #[must_use]
        pub fn health(&self) -> HealthCheck {
            let name = self.inner.config.name.clone();
            let progress = *self.inner.progress.borrow();
            let backlog = self.inner.changes.max_backlog();
            let threshold = self.inner.config.backlog_warning;

            let check = if progress.halted {
                HealthCheck::unhealthy(name, "Store has halted")
            } else if backlog >= threshold {
                HealthCheck::degraded(
                    name,
                    format!("A subscriber has {backlog} undelivered changes"),
                )
            } else {
                HealthCheck::healthy(name)
            };

            check
                .with_metadata("pending_actions", progress.pending.to_string())
                .with_metadata(
                    "subscribers",
                    self.inner.changes.subscriber_count().to_string(),
                )
                .with_metadata("max_backlog", backlog.to_string())
        }
    }

    impl<S, A> Clone for Store<S, A> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<S, A> Dispatcher<A> for Store<S, A>
    where
        S: Send + Sync + 'static,
        A: Send + 'static,
    {
        fn dispatch(&self, action: A) {
            self.inner.dispatcher.dispatch(action);
        }

        fn closed(&self) -> BoxFuture<'static, ()> {
            self.inner.dispatcher.closed()
        }
    }

    impl<S, A> StateHolder<S> for Store<S, A>
    where
        S: Send + Sync + 'static,
        A: Send + 'static,
    {
        fn state(&self) -> Arc<S> {
            self.inner.cell.state()
        }
    }

    impl<S, A> std::fmt::Debug for Store<S, A> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Store")
                .field("name", &self.inner.config.name)
                .field("pending", &self.inner.progress.borrow().pending)
                .field("changes", &self.inner.changes)
                .finish_non_exhaustive()
        }
    }

    /// Builds stores whose public dispatcher is wrapped in middleware
    ///
    /// Created by [`with_middleware`] (or [`StoreCreator::new`] for none).
    pub struct StoreCreator<S, A> {
        middleware: Vec<MiddlewareRef<S, A>>,
        config: StoreConfig,
    }

    impl<S, A> StoreCreator<S, A>
    where
        S: Send + Sync + 'static,
        A: Send + 'static,
    {
        /// A creator with no middleware and the default configuration
        #[must_use]
        pub fn new() -> Self {
            Self {
                middleware: Vec::new(),
                config: StoreConfig::default(),
            }
        }

        /// Use `config` for every store this creator builds
        #[must_use]
        pub fn with_config(mut self, config: StoreConfig) -> Self {
            self.config = config;
            self
        }

        /// Build a store
        ///
        /// The first middleware in the list sees each action first; the
        /// last one wraps the channel dispatcher directly.
        ///
        /// # Panics
        ///
        /// Panics if called outside a Tokio runtime.
        #[must_use]
        pub fn create_store<R>(&self, initial_state: S, reducer: R) -> Store<S, A>
        where
            R: Reducer<State = S, Action = A> + Send + 'static,
        {
            Store::build(
                Handle::current(),
                initial_state,
                reducer,
                self.config.clone(),
                &self.middleware,
            )
        }

        /// Build a store, failing if no Tokio runtime is available
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::NoRuntime`] outside a runtime context.
        pub fn try_create_store<R>(&self, initial_state: S, reducer: R) -> Result<Store<S, A>, StoreError>
        where
            R: Reducer<State = S, Action = A> + Send + 'static,
        {
            let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
            Ok(Store::build(
                runtime,
                initial_state,
                reducer,
                self.config.clone(),
                &self.middleware,
            ))
        }
    }

    impl<S, A> Default for StoreCreator<S, A>
    where
        S: Send + Sync + 'static,
        A: Send + 'static,
    {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<S, A> std::fmt::Debug for StoreCreator<S, A> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("StoreCreator")
                .field("middleware", &self.middleware.len())
                .field("config", &self.config)
                .finish()
        }
    }

    /// Compose a middleware list into a [`StoreCreator`]
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = with_middleware(vec![logger, delay_double])
    ///     .create_store(State::default(), reducer);
    /// ```
    #[must_use]
    pub fn with_middleware<S, A>(middleware: Vec<MiddlewareRef<S, A>>) -> StoreCreator<S, A>
    where
        S: Send + Sync + 'static,
        A: Send + 'static,
    {
        StoreCreator {
            middleware,
            config: StoreConfig::default(),
        }
    }
}

// Re-export for convenience
pub use changes::{ChangeStream, Listener, Subscription};
pub use defer::defer;
pub use logger::LoggingMiddleware;
pub use store::{Store, StoreCreator, with_middleware};

//! # Flow Core
//!
//! Capability traits for the Flow unidirectional state container.
//!
//! This crate defines the pieces an application plugs into a store. It has no
//! runtime of its own: the `flow-runtime` crate owns the state cell, the action
//! channel and the change stream.
//!
//! ## Core Concepts
//!
//! - **State**: An immutable value describing the application at one point in time
//! - **Action**: A value describing an intended state transition
//! - **Reducer**: Pure function `(&State, Action) → State`
//! - **Dispatcher**: The capability to submit an action
//! - **`StateHolder`**: Read access to the most recently committed state
//! - **Middleware**: Turns the next dispatcher into a new one (chain of responsibility)
//!
//! ## Architecture Principles
//!
//! - Unidirectional Data Flow
//! - Reducers are the only writers of state
//! - Side effects live in middleware, never in reducers
//!
//! ## Example
//!
//! ```
//! use flow_core::reducer::{Reducer, reducer_fn};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct CountState {
//!     count: i64,
//! }
//!
//! enum CountAction {
//!     Increment,
//!     Decrement,
//! }
//!
//! let reducer = reducer_fn(|state: &CountState, action: CountAction| match action {
//!     CountAction::Increment => CountState { count: state.count + 1 },
//!     CountAction::Decrement => CountState { count: state.count - 1 },
//! });
//!
//! let next = reducer.reduce(&CountState { count: 0 }, CountAction::Increment);
//! assert_eq!(next.count, 1);
//! ```

/// Reducer composition utilities
pub mod composition;

/// Reducer module - The sole writer of state transitions
///
/// Reducers are pure functions: `(&State, Action) → State`.
///
/// They never mutate the state they are handed and never perform side
/// effects. Every reduction produces a new value which the store commits
/// atomically.
pub mod reducer {
    use std::marker::PhantomData;

    /// The Reducer trait - computes the next state from the current one
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state type this reducer produces
    /// - `Action`: The action type this reducer processes
    ///
    /// # Panics
    ///
    /// A reducer is expected to be total over every action it is registered
    /// for. A panic inside `reduce` is a programming error: the store keeps
    /// the last committed state and stops processing.
    ///
    /// # Example
    ///
    /// ```
    /// use flow_core::reducer::Reducer;
    ///
    /// struct Toggle;
    ///
    /// impl Reducer for Toggle {
    ///     type State = bool;
    ///     type Action = ();
    ///
    ///     fn reduce(&self, state: &bool, _action: ()) -> bool {
    ///         !state
    ///     }
    /// }
    ///
    /// assert!(Toggle.reduce(&false, ()));
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// Reduce an action into the next state
        ///
        /// # Arguments
        ///
        /// - `state`: The current committed state (read only)
        /// - `action`: The action to process
        ///
        /// # Returns
        ///
        /// The new state. The store replaces the committed value with it.
        fn reduce(&self, state: &Self::State, action: Self::Action) -> Self::State;
    }

    impl<R> Reducer for Box<R>
    where
        R: Reducer + ?Sized,
    {
        type State = R::State;
        type Action = R::Action;

        fn reduce(&self, state: &Self::State, action: Self::Action) -> Self::State {
            (**self).reduce(state, action)
        }
    }

    /// A [`Reducer`] backed by a plain function or closure
    ///
    /// Built with [`reducer_fn`].
    pub struct FnReducer<F, S, A> {
        f: F,
        _marker: PhantomData<fn(&S, A) -> S>,
    }

    /// Wrap a closure `(&State, Action) -> State` as a [`Reducer`]
    #[must_use]
    pub const fn reducer_fn<S, A, F>(f: F) -> FnReducer<F, S, A>
    where
        F: Fn(&S, A) -> S,
    {
        FnReducer {
            f,
            _marker: PhantomData,
        }
    }

    impl<F, S, A> Reducer for FnReducer<F, S, A>
    where
        F: Fn(&S, A) -> S,
    {
        type State = S;
        type Action = A;

        fn reduce(&self, state: &S, action: A) -> S {
            (self.f)(state, action)
        }
    }

    impl<F: Clone, S, A> Clone for FnReducer<F, S, A> {
        fn clone(&self) -> Self {
            Self {
                f: self.f.clone(),
                _marker: PhantomData,
            }
        }
    }

    impl<F, S, A> std::fmt::Debug for FnReducer<F, S, A> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FnReducer").finish_non_exhaustive()
        }
    }
}

/// Dispatcher module - The write capability
///
/// A dispatcher accepts an action and hands it on: to the next middleware,
/// or, at the innermost position, to the store's action channel. Dispatch is
/// fire-and-forget and never reports failure.
pub mod dispatcher {
    use futures::future::BoxFuture;
    use std::sync::Arc;

    /// Shared, type-erased dispatcher handle
    pub type DispatcherRef<A> = Arc<dyn Dispatcher<A>>;

    /// The capability to submit an action for processing
    pub trait Dispatcher<A>: Send + Sync {
        /// Submit an action
        ///
        /// Never blocks beyond enqueueing and never fails for a valid action.
        fn dispatch(&self, action: A);

        /// Resolves once actions submitted here can no longer reach a store
        ///
        /// The store's channel dispatcher resolves this when the store is
        /// dropped. Dispatchers that wrap another one should forward to it;
        /// the default never resolves.
        fn closed(&self) -> BoxFuture<'static, ()> {
            Box::pin(futures::future::pending())
        }
    }

    struct FnDispatcher<F>(F);

    impl<A, F> Dispatcher<A> for FnDispatcher<F>
    where
        F: Fn(A) + Send + Sync,
    {
        fn dispatch(&self, action: A) {
            (self.0)(action);
        }
    }

    /// Wrap a closure as a free-standing [`Dispatcher`]
    ///
    /// The returned dispatcher never reports itself closed. Prefer
    /// [`intercept`] when wrapping another dispatcher.
    pub fn dispatcher_fn<A, F>(f: F) -> DispatcherRef<A>
    where
        A: 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        Arc::new(FnDispatcher(f))
    }

    struct Intercept<A, F> {
        next: DispatcherRef<A>,
        f: F,
    }

    impl<A, F> Dispatcher<A> for Intercept<A, F>
    where
        A: 'static,
        F: Fn(&DispatcherRef<A>, A) + Send + Sync,
    {
        fn dispatch(&self, action: A) {
            (self.f)(&self.next, action);
        }

        fn closed(&self) -> BoxFuture<'static, ()> {
            self.next.closed()
        }
    }

    /// Build a dispatcher that sees every action before `next` does
    ///
    /// The closure receives `next` and the action; it decides whether, when
    /// and with what to call `next.dispatch`. Closure notification is
    /// forwarded to `next`.
    ///
    /// # Example
    ///
    /// ```
    /// use flow_core::dispatcher::{dispatcher_fn, intercept};
    /// use std::sync::{Arc, Mutex};
    ///
    /// let seen = Arc::new(Mutex::new(Vec::new()));
    /// let sink = {
    ///     let seen = Arc::clone(&seen);
    ///     dispatcher_fn(move |n: i32| seen.lock().unwrap().push(n))
    /// };
    ///
    /// // Doubles every action before forwarding it
    /// let doubled = intercept(sink, |next, n: i32| next.dispatch(n * 2));
    /// doubled.dispatch(21);
    ///
    /// assert_eq!(*seen.lock().unwrap(), vec![42]);
    /// ```
    pub fn intercept<A, F>(next: DispatcherRef<A>, f: F) -> DispatcherRef<A>
    where
        A: 'static,
        F: Fn(&DispatcherRef<A>, A) + Send + Sync + 'static,
    {
        Arc::new(Intercept { next, f })
    }
}

/// State module - Read access to the committed state
pub mod state {
    use std::sync::Arc;

    /// Shared, type-erased state accessor
    pub type StateHolderRef<S> = Arc<dyn StateHolder<S>>;

    /// Read accessor always reflecting the most recently committed state
    ///
    /// The returned value is the state at call time, never a snapshot taken
    /// when the holder was created.
    pub trait StateHolder<S>: Send + Sync {
        /// The current committed state
        fn state(&self) -> Arc<S>;
    }

    struct FnStateHolder<F>(F);

    impl<S, F> StateHolder<S> for FnStateHolder<F>
    where
        F: Fn() -> Arc<S> + Send + Sync,
    {
        fn state(&self) -> Arc<S> {
            (self.0)()
        }
    }

    /// Wrap a closure as a [`StateHolder`]
    pub fn state_fn<S, F>(f: F) -> StateHolderRef<S>
    where
        S: 'static,
        F: Fn() -> Arc<S> + Send + Sync + 'static,
    {
        Arc::new(FnStateHolder(f))
    }
}

/// Middleware module - Interceptors between the caller and the reducer
///
/// Middleware is folded right to left: given `[m1, m2, m3]`, `m1` sees an
/// action first and `m3` wraps the innermost dispatcher directly.
pub mod middleware {
    use super::dispatcher::DispatcherRef;
    use super::state::StateHolderRef;
    use std::sync::Arc;

    /// Shared, type-erased middleware handle
    pub type MiddlewareRef<S, A> = Arc<dyn Middleware<S, A>>;

    /// A composable interceptor sitting in front of the next dispatcher
    ///
    /// `apply` is called once when a store is created. The returned
    /// dispatcher may call `next.dispatch` any number of times (including
    /// never), synchronously or later, with the same action or different
    /// ones. It must not bypass `next` to change state.
    pub trait Middleware<S, A>: Send + Sync {
        /// Wrap `next`, returning the dispatcher callers will use instead
        ///
        /// `state` is live: it always reflects the latest committed state.
        fn apply(&self, state: StateHolderRef<S>, next: DispatcherRef<A>) -> DispatcherRef<A>;
    }

    struct FnMiddleware<F>(F);

    impl<S, A, F> Middleware<S, A> for FnMiddleware<F>
    where
        F: Fn(StateHolderRef<S>, DispatcherRef<A>) -> DispatcherRef<A> + Send + Sync,
    {
        fn apply(&self, state: StateHolderRef<S>, next: DispatcherRef<A>) -> DispatcherRef<A> {
            (self.0)(state, next)
        }
    }

    /// Wrap a closure as a [`Middleware`]
    pub fn middleware_fn<S, A, F>(f: F) -> MiddlewareRef<S, A>
    where
        S: 'static,
        A: 'static,
        F: Fn(StateHolderRef<S>, DispatcherRef<A>) -> DispatcherRef<A> + Send + Sync + 'static,
    {
        Arc::new(FnMiddleware(f))
    }

    /// Fold a middleware list around `innermost`
    ///
    /// Returns the outermost dispatcher. The first middleware in the list
    /// sees actions first; the last one receives `innermost` as its `next`.
    /// An empty list returns `innermost` unchanged.
    pub fn compose<S, A>(
        middleware: &[MiddlewareRef<S, A>],
        state: &StateHolderRef<S>,
        innermost: DispatcherRef<A>,
    ) -> DispatcherRef<A> {
        middleware
            .iter()
            .rev()
            .fold(innermost, |next, m| m.apply(Arc::clone(state), next))
    }
}

// Re-export commonly used types
pub use dispatcher::{Dispatcher, DispatcherRef, dispatcher_fn, intercept};
pub use middleware::{Middleware, MiddlewareRef, compose, middleware_fn};
pub use reducer::{Reducer, reducer_fn};
pub use state::{StateHolder, StateHolderRef, state_fn};

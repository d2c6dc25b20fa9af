//! Reducer composition utilities
//!
//! **`combine_reducers`** runs several reducers over the same state and action
//! types, threading the state through each one in order. This lets a feature
//! split its transition logic across independent reducers while the store
//! still sees a single one.
//!
//! # Examples
//!
//! ```
//! use flow_core::Reducer;
//! use flow_core::composition::{BoxedReducer, combine_reducers};
//! use flow_core::reducer::reducer_fn;
//!
//! #[derive(Clone, Debug, Default, PartialEq)]
//! struct AppState {
//!     count: i32,
//!     last: Option<&'static str>,
//! }
//!
//! #[derive(Clone)]
//! enum AppAction {
//!     Increment,
//!     Named(&'static str),
//! }
//!
//! let count = reducer_fn(|state: &AppState, action: AppAction| match action {
//!     AppAction::Increment => AppState { count: state.count + 1, ..state.clone() },
//!     AppAction::Named(_) => state.clone(),
//! });
//!
//! let names = reducer_fn(|state: &AppState, action: AppAction| match action {
//!     AppAction::Named(name) => AppState { last: Some(name), ..state.clone() },
//!     AppAction::Increment => state.clone(),
//! });
//!
//! let reducers: Vec<BoxedReducer<AppState, AppAction>> = vec![Box::new(count), Box::new(names)];
//! let combined = combine_reducers(reducers);
//!
//! let state = combined.reduce(&AppState::default(), AppAction::Increment);
//! let state = combined.reduce(&state, AppAction::Named("flow"));
//! assert_eq!(state, AppState { count: 1, last: Some("flow") });
//! ```

use crate::reducer::Reducer;

/// Boxed reducer accepted by [`combine_reducers`]
pub type BoxedReducer<S, A> = Box<dyn Reducer<State = S, Action = A> + Send + Sync>;

/// Combines multiple reducers that operate on the same state and action types.
///
/// Each reducer receives the state produced by the one before it, along with
/// a clone of the action. An empty list behaves as the identity reducer,
/// which requires `S: Clone`.
#[must_use]
pub fn combine_reducers<S, A>(reducers: Vec<BoxedReducer<S, A>>) -> CombinedReducer<S, A>
where
    S: Clone,
    A: Clone,
{
    CombinedReducer { reducers }
}

/// A reducer that runs a list of reducers in sequence
///
/// Created by [`combine_reducers`].
pub struct CombinedReducer<S, A> {
    reducers: Vec<BoxedReducer<S, A>>,
}

impl<S, A> CombinedReducer<S, A> {
    /// Number of reducers in the combination
    #[must_use]
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    /// Whether the combination is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl<S, A> Reducer for CombinedReducer<S, A>
where
    S: Clone,
    A: Clone,
{
    type State = S;
    type Action = A;

    fn reduce(&self, state: &S, action: A) -> S {
        self.reducers
            .iter()
            .fold(state.clone(), |current, reducer| {
                reducer.reduce(&current, action.clone())
            })
    }
}

impl<S, A> std::fmt::Debug for CombinedReducer<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedReducer")
            .field("reducers", &self.reducers.len())
            .finish()
    }
}

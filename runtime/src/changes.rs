//! Change stream: multicast notification of committed state.
//!
//! Every subscription owns an unbounded queue. Publishing never blocks and
//! never drops a value; a subscriber that falls behind only grows its own
//! backlog, which is reported through `tracing` once it crosses the store's
//! `backlog_warning` threshold.

use crate::metrics::StoreMetrics;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Entry<S> {
    id: u64,
    tx: mpsc::UnboundedSender<Arc<S>>,
    backlog: Arc<AtomicUsize>,
    warned: bool,
}

struct Registry<S> {
    next_id: u64,
    entries: Vec<Entry<S>>,
}

type SharedRegistry<S> = Arc<Mutex<Registry<S>>>;

fn lock<S>(registry: &Mutex<Registry<S>>) -> MutexGuard<'_, Registry<S>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Multicast stream of committed states
///
/// Cloning yields another handle onto the same set of subscribers.
pub struct ChangeStream<S> {
    registry: SharedRegistry<S>,
    backlog_warning: usize,
    metrics: StoreMetrics,
}

impl<S> ChangeStream<S> {
    pub(crate) fn new(backlog_warning: usize, metrics: StoreMetrics) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
            backlog_warning,
            metrics,
        }
    }

    /// Subscribe to future changes
    ///
    /// Only values published after this call are delivered; there is no
    /// replay of history or of the current state.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<S> {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));

        let (id, count) = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push(Entry {
                id,
                tx,
                backlog: Arc::clone(&backlog),
                warned: false,
            });
            (id, registry.entries.len())
        };

        tracing::debug!(subscription = id, subscribers = count, "Change stream subscribed");
        self.metrics.record_subscribers(count);

        Subscription {
            id,
            rx,
            backlog,
            registry: Arc::downgrade(&self.registry),
            metrics: self.metrics.clone(),
        }
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    /// Largest number of undelivered values held for any one subscriber
    #[must_use]
    pub fn max_backlog(&self) -> usize {
        lock(&self.registry)
            .entries
            .iter()
            .map(|entry| entry.backlog.load(Ordering::Acquire))
            .max()
            .unwrap_or(0)
    }

    /// Run `commit`, then deliver `value` to every live subscriber
    ///
    /// Both happen under the registry lock, so a subscription either exists
    /// before the commit and receives `value`, or is created afterwards and
    /// does not. Subscribers whose receiving side is gone are pruned.
    /// Returns the number of subscribers the value was queued for.
    pub(crate) fn publish<F>(&self, value: &Arc<S>, commit: F) -> usize
    where
        F: FnOnce(),
    {
        let threshold = self.backlog_warning;

        let delivered = {
            let mut registry = lock(&self.registry);
            commit();
            registry.entries.retain_mut(|entry| {
                // Counted before sending so the receiver never decrements first
                let backlog = entry.backlog.fetch_add(1, Ordering::AcqRel) + 1;
                if entry.tx.send(Arc::clone(value)).is_err() {
                    tracing::trace!(subscription = entry.id, "Pruning closed subscription");
                    return false;
                }

                if backlog >= threshold {
                    if !entry.warned {
                        entry.warned = true;
                        tracing::warn!(
                            subscription = entry.id,
                            backlog,
                            threshold,
                            "Change stream subscriber is falling behind"
                        );
                    }
                } else {
                    entry.warned = false;
                }
                true
            });
            registry.entries.len()
        };

        self.metrics.record_publish(delivered);
        delivered
    }
}

impl<S> Clone for ChangeStream<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            backlog_warning: self.backlog_warning,
            metrics: self.metrics.clone(),
        }
    }
}

impl<S> std::fmt::Debug for ChangeStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("subscribers", &self.subscriber_count())
            .field("backlog_warning", &self.backlog_warning)
            .finish_non_exhaustive()
    }
}

/// A single subscriber's view of the change stream
///
/// Yields committed states in commit order. The stream ends once the store
/// and every [`ChangeStream`] handle are dropped. Dropping the subscription
/// unsubscribes it.
pub struct Subscription<S> {
    id: u64,
    rx: mpsc::UnboundedReceiver<Arc<S>>,
    backlog: Arc<AtomicUsize>,
    registry: Weak<Mutex<Registry<S>>>,
    metrics: StoreMetrics,
}

impl<S> Subscription<S> {
    /// Wait for the next committed state
    ///
    /// Returns `None` once the store is gone and every queued value has
    /// been received.
    pub async fn recv(&mut self) -> Option<Arc<S>> {
        let value = self.rx.recv().await;
        if value.is_some() {
            self.backlog.fetch_sub(1, Ordering::AcqRel);
        }
        value
    }

    /// Take the next queued state without waiting
    pub fn try_recv(&mut self) -> Option<Arc<S>> {
        let value = self.rx.try_recv().ok();
        if value.is_some() {
            self.backlog.fetch_sub(1, Ordering::AcqRel);
        }
        value
    }

    /// Number of values queued but not yet received
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    /// Stop receiving changes
    ///
    /// Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl<S> Stream for Subscription<S> {
    type Item = Arc<S>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = this.rx.poll_recv(cx);
        if let Poll::Ready(Some(_)) = &poll {
            this.backlog.fetch_sub(1, Ordering::AcqRel);
        }
        poll
    }
}

impl<S> Drop for Subscription<S> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let count = {
                let mut registry = lock(&registry);
                registry.entries.retain(|entry| entry.id != self.id);
                registry.entries.len()
            };
            tracing::debug!(
                subscription = self.id,
                subscribers = count,
                "Change stream unsubscribed"
            );
            self.metrics.record_subscribers(count);
        }
    }
}

impl<S> std::fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("backlog", &self.backlog())
            .finish_non_exhaustive()
    }
}

/// Handle to a callback registered with `Store::subscribe_to_changes`
///
/// Dropping the handle leaves the callback running for as long as the store
/// lives; call [`Listener::unsubscribe`] to stop it early.
#[derive(Debug)]
pub struct Listener {
    task: JoinHandle<()>,
}

impl Listener {
    pub(crate) const fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stop delivering changes to the callback
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    /// Whether the callback is still receiving changes
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

//! Store behavior under middleware, concurrency and teardown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code

use flow_core::dispatcher::{Dispatcher, DispatcherRef, intercept};
use flow_core::middleware::{Middleware, MiddlewareRef, middleware_fn};
use flow_core::reducer::{Reducer, reducer_fn};
use flow_core::state::StateHolderRef;
use flow_runtime::{LoggingMiddleware, Store, StoreConfig, StoreError, defer, with_middleware};
use flow_testing::{ActionLog, ChangeRecorder, RecordingMiddleware, SuppressMiddleware};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::assert_pending;

fn quiet() -> StoreConfig {
    StoreConfig::default().with_metrics(false)
}

// ---------------------------------------------------------------------------
// Middleware ordering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Tagged {
    name: &'static str,
    replay: bool,
}

/// Forwards every action, and once per original action schedules a replay
/// through the head of the chain.
struct DelayDouble {
    delay: Duration,
    head: Arc<OnceLock<Weak<dyn Dispatcher<Tagged>>>>,
}

impl Middleware<Vec<&'static str>, Tagged> for DelayDouble {
    fn apply(
        &self,
        _state: StateHolderRef<Vec<&'static str>>,
        next: DispatcherRef<Tagged>,
    ) -> DispatcherRef<Tagged> {
        let head = Arc::clone(&self.head);
        let delay = self.delay;
        intercept(next, move |next, action: Tagged| {
            let replay = (!action.replay).then(|| Tagged {
                replay: true,
                ..action.clone()
            });
            next.dispatch(action);
            if let Some(replay) = replay {
                if let Some(head) = head.get().and_then(Weak::upgrade) {
                    defer(&head, delay, replay);
                }
            }
        })
    }
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn logger_lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .filter(|line| line.contains("action -->") || line.contains("state <--"))
            .map(str::to_owned)
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn test_logger_then_delay_double() {
    let capture = Capture::default();
    let subscriber = {
        let capture = capture.clone();
        tracing_subscriber::fmt()
            .with_writer(move || capture.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .without_time()
            .finish()
    };
    let _guard = tracing::subscriber::set_default(subscriber);

    let delay = Duration::from_secs(2);
    let head = Arc::new(OnceLock::new());
    let chain: Vec<MiddlewareRef<Vec<&'static str>, Tagged>> = vec![
        Arc::new(LoggingMiddleware::new()),
        Arc::new(DelayDouble {
            delay,
            head: Arc::clone(&head),
        }),
    ];
    let store = with_middleware(chain).with_config(quiet()).create_store(
        Vec::new(),
        reducer_fn(|seen: &Vec<&'static str>, action: Tagged| {
            let mut seen = seen.clone();
            seen.push(action.name);
            seen
        }),
    );
    assert!(head.set(Arc::downgrade(&store.dispatcher())).is_ok());

    let mut changes = store.subscribe();
    let start = Instant::now();

    store.dispatch(Tagged {
        name: "a",
        replay: false,
    });

    assert_eq!(*changes.recv().await.unwrap(), vec!["a"]);
    assert!(start.elapsed() < delay);

    assert_eq!(*changes.recv().await.unwrap(), vec!["a", "a"]);
    assert!(start.elapsed() >= delay);
    assert!(changes.try_recv().is_none());

    let lines = capture.logger_lines();
    assert_eq!(lines.len(), 4, "unexpected logger output: {lines:#?}");
    assert!(lines[0].contains("action -->") && lines[0].contains("replay: false"));
    assert!(lines[1].contains("state <--"));
    assert!(lines[2].contains("action -->") && lines[2].contains("replay: true"));
    assert!(lines[3].contains("state <--"));
}

#[tokio::test]
async fn test_first_middleware_sees_actions_first() {
    let log = ActionLog::new();
    let chain: Vec<MiddlewareRef<i32, i32>> = vec![
        Arc::new(RecordingMiddleware::with_log("first", &log)),
        Arc::new(RecordingMiddleware::with_log("second", &log)),
    ];
    let store = with_middleware(chain)
        .with_config(quiet())
        .create_store(0, reducer_fn(|state: &i32, n: i32| state + n));

    store.dispatch(5);
    store.settled().await.unwrap();

    assert_eq!(log.entries(), vec![("first", 5), ("second", 5)]);
    assert_eq!(*store.state(), 5);
}

// ---------------------------------------------------------------------------
// Suppression and translation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_suppressed_action_does_not_block_later_ones() {
    let chain: Vec<MiddlewareRef<i32, i32>> =
        vec![Arc::new(SuppressMiddleware::new(|n: &i32| *n < 0))];
    let store = with_middleware(chain)
        .with_config(quiet())
        .create_store(0, reducer_fn(|state: &i32, n: i32| state + n));
    let recorder = ChangeRecorder::attach(&store);

    store.dispatch(-100);
    store.dispatch(1);
    store.dispatch(-1);
    store.dispatch(2);
    store.settled().await.unwrap();

    let states: Vec<i32> = recorder.wait_for(2).await.iter().map(|s| **s).collect();
    assert_eq!(states, vec![1, 3]);
    assert_eq!(recorder.len(), 2);
}

#[tokio::test]
async fn test_middleware_reads_live_state() {
    // Caps the running total at 10 by rewriting the action
    let cap = middleware_fn(|state: StateHolderRef<i32>, next: DispatcherRef<i32>| {
        intercept(next, move |next, n: i32| {
            let room = 10 - *state.state();
            next.dispatch(n.min(room));
        })
    });
    let store = with_middleware(vec![cap])
        .with_config(quiet())
        .create_store(0, reducer_fn(|state: &i32, n: i32| state + n));

    store.dispatch(7);
    store.settled().await.unwrap();
    store.dispatch(7);
    store.settled().await.unwrap();

    assert_eq!(*store.state(), 10);
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_late_subscriber_sees_only_new_commits() {
    let store = Store::with_config(0, reducer_fn(|state: &i32, n: i32| state + n), quiet());

    for n in 1..=3 {
        store.dispatch(n);
    }
    store.settled().await.unwrap();

    let mut late = store.subscribe();
    assert!(late.try_recv().is_none());

    store.dispatch(4);
    assert_eq!(*late.recv().await.unwrap(), 10);
    assert!(late.try_recv().is_none());
}

#[tokio::test]
async fn test_settled_is_pending_until_consumer_runs() {
    let store = Store::with_config(0, reducer_fn(|state: &i32, n: i32| state + n), quiet());

    store.dispatch(1);
    assert_eq!(store.pending(), 1);

    {
        let mut settled = tokio_test::task::spawn(store.settled());
        assert_pending!(settled.poll());
    }

    store.settled().await.unwrap();
    assert_eq!(store.pending(), 0);
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Adds one per action and fails loudly if two reductions ever overlap
#[derive(Default)]
struct ExclusiveCounter {
    busy: AtomicBool,
}

impl Reducer for ExclusiveCounter {
    type State = u64;
    type Action = u64;

    fn reduce(&self, state: &u64, _action: u64) -> u64 {
        assert!(
            !self.busy.swap(true, Ordering::SeqCst),
            "reductions overlapped"
        );
        let next = state + 1;
        self.busy.store(false, Ordering::SeqCst);
        next
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_are_serialized() {
    const PRODUCERS: u64 = 8;
    const PER_PRODUCER: u64 = 250;
    const TOTAL: u64 = PRODUCERS * PER_PRODUCER;

    let store = Store::with_config(0, ExclusiveCounter::default(), quiet());
    let recorder = ChangeRecorder::attach(&store);

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..PER_PRODUCER {
                    store.dispatch(p * PER_PRODUCER + i);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    store.settled().await.unwrap();
    assert_eq!(*store.state(), TOTAL);

    let states: Vec<u64> = recorder
        .wait_for(usize::try_from(TOTAL).unwrap())
        .await
        .iter()
        .map(|s| **s)
        .collect();
    assert_eq!(states, (1..=TOTAL).collect::<Vec<_>>());
}

// ---------------------------------------------------------------------------
// Middleware failure
// ---------------------------------------------------------------------------

/// Panics on `13`, forwards everything else
fn unlucky() -> MiddlewareRef<i32, i32> {
    middleware_fn(|_state: StateHolderRef<i32>, next: DispatcherRef<i32>| {
        intercept(next, |next, n: i32| {
            if n == 13 {
                panic!("unlucky number");
            }
            next.dispatch(n);
        })
    })
}

#[tokio::test]
async fn test_middleware_panic_halts_store() {
    let store = with_middleware(vec![unlucky()])
        .with_config(quiet())
        .create_store(0, reducer_fn(|state: &i32, n: i32| state + n));
    let mut changes = store.subscribe();

    store.dispatch(2);
    store.dispatch(13);

    assert!(store.is_halted());
    assert!(store.health().status.is_unhealthy());

    // Discarded once halted
    store.dispatch(1);

    assert!(matches!(store.settled().await, Err(StoreError::Halted(_))));
    assert_eq!(*changes.recv().await.unwrap(), 2);
    assert!(changes.try_recv().is_none());
    assert_eq!(*store.state(), 2);
}

#[tokio::test]
async fn test_outer_middleware_survives_inner_panic() {
    let log = ActionLog::new();
    let chain: Vec<MiddlewareRef<i32, i32>> = vec![
        Arc::new(RecordingMiddleware::with_log("outer", &log)),
        unlucky(),
    ];
    let store = with_middleware(chain)
        .with_config(quiet())
        .create_store(0, reducer_fn(|state: &i32, n: i32| state + n));

    store.dispatch(13);
    store.dispatch(4);

    assert_eq!(log.seen_by("outer"), vec![13, 4]);
    assert!(store.is_halted());
    assert_eq!(*store.state(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deferred_middleware_panic_halts_store() {
    let deferrer = middleware_fn(|_state: StateHolderRef<i32>, next: DispatcherRef<i32>| {
        intercept(next, |next, n: i32| {
            if n == 1 {
                defer(next, Duration::from_secs(1), 13);
            }
            next.dispatch(n);
        })
    });
    let store = with_middleware(vec![deferrer, unlucky()])
        .with_config(quiet())
        .create_store(0, reducer_fn(|state: &i32, n: i32| state + n));

    store.dispatch(1);
    store.settled().await.unwrap();
    assert!(!store.is_halted());

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(store.is_halted());
    assert!(matches!(store.settled().await, Err(StoreError::Halted(0))));
    assert_eq!(*store.state(), 1);
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_dropping_store_abandons_deferred_dispatch() {
    let log = ActionLog::new();
    let handles = Arc::new(Mutex::new(Vec::new()));

    let deferrer = {
        let handles = Arc::clone(&handles);
        middleware_fn(move |_state: StateHolderRef<i32>, next: DispatcherRef<i32>| {
            let handles = Arc::clone(&handles);
            intercept(next, move |next, n: i32| {
                next.dispatch(n);
                if n > 0 {
                    let handle = defer(next, Duration::from_secs(10), -n);
                    handles.lock().unwrap().push(handle);
                }
            })
        })
    };
    let chain: Vec<MiddlewareRef<i32, i32>> = vec![
        deferrer,
        Arc::new(RecordingMiddleware::with_log("inner", &log)),
    ];
    let store = with_middleware(chain)
        .with_config(quiet())
        .create_store(0, reducer_fn(|state: &i32, n: i32| state + n));

    store.dispatch(3);
    store.settled().await.unwrap();
    drop(store);

    let handle = handles.lock().unwrap().pop().unwrap();
    let start = Instant::now();
    handle.await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(log.seen_by("inner"), vec![3]);
}

#[tokio::test]
async fn test_listener_ends_with_store() {
    let store = Store::with_config(0, reducer_fn(|state: &i32, n: i32| state + n), quiet());
    let listener = store.subscribe_to_changes(|_| {});
    assert!(listener.is_active());

    drop(store);
    tokio::time::timeout(Duration::from_secs(5), async {
        while listener.is_active() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("listener should stop once the store is gone");
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

mod determinism {
    use super::*;
    use proptest::prelude::*;

    fn run_store(actions: &[i64]) -> i64 {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = Store::with_config(
                0_i64,
                reducer_fn(|state: &i64, n: i64| state.wrapping_mul(3).wrapping_add(n)),
                quiet(),
            );
            for &n in actions {
                store.dispatch(n);
            }
            store.settled().await.unwrap();
            *store.state()
        })
    }

    proptest! {
        #[test]
        fn final_state_is_left_fold(actions in prop::collection::vec(-1000_i64..1000, 0..64)) {
            let expected = actions
                .iter()
                .fold(0_i64, |state, &n| state.wrapping_mul(3).wrapping_add(n));

            prop_assert_eq!(run_store(&actions), expected);
        }
    }
}

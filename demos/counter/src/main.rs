//! Counter example binary
//!
//! Demonstrates the Flow state container with a simulated slow service.
//!
//! Set `COUNTER_DELAY_MS` to change the service latency.

use anyhow::Context;
use counter::{CountAction, CountServiceMiddleware, counter_store};
use flow_runtime::metrics::MetricsExporter;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "counter=debug,flow_runtime=debug,flow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let delay = match std::env::var("COUNTER_DELAY_MS") {
        Ok(ms) => Duration::from_millis(
            ms.parse()
                .with_context(|| format!("COUNTER_DELAY_MS must be milliseconds, got {ms:?}"))?,
        ),
        Err(_) => CountServiceMiddleware::DEFAULT_DELAY,
    };

    let mut exporter = MetricsExporter::new();
    exporter.install()?;

    println!("=== Counter Example: Flow ===\n");

    let store = counter_store(delay);
    let mut changes = store.subscribe();

    let state = store.state();
    println!("Initial state: count={} loading={}", state.count, state.loading);

    for round in 1..=3 {
        println!("\n>>> Round {round}: dispatching StartIncrement");
        store.dispatch(CountAction::StartIncrement);

        // Requested, then delivered
        for _ in 0..2 {
            let state = changes
                .recv()
                .await
                .context("store stopped before the increment arrived")?;
            println!("State: count={} loading={}", state.count, state.loading);
        }
    }

    let health = store.health();
    println!("\nStore health: {}", health.status);

    if let Some(metrics) = exporter.render() {
        println!("\n--- Metrics ---\n{metrics}");
    }

    println!("\n=== Demonstration Complete ===");
    println!("\nKey concepts demonstrated:");
    println!("  • State: CountState (count and loading flag)");
    println!("  • Action: CountAction (StartIncrement, Increment)");
    println!("  • Reducer: Pure function (state, action) → new state");
    println!("  • Middleware: Logging and a deferred service response");
    println!("  • Change stream: One notification per committed state");

    Ok(())
}

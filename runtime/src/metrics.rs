//! Prometheus metrics for observability and monitoring.
//!
//! Every store records:
//! - Actions accepted by its channel dispatcher
//! - Reductions committed and their duration
//! - Actions discarded because the store was gone
//! - Change notifications published and the current subscriber count
//!
//! Recording goes through the `metrics` facade, so nothing is exported until
//! a recorder is installed. [`MetricsExporter`] installs a Prometheus one.
//!
//! # Example
//!
//! ```rust,no_run
//! use flow_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter for store metrics.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this logs
    /// a warning and succeeds without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

fn register_metrics() {
    describe_counter!(
        "flow_actions_dispatched_total",
        "Total number of actions accepted by a store's action channel"
    );
    describe_counter!(
        "flow_actions_reduced_total",
        "Total number of reductions committed"
    );
    describe_counter!(
        "flow_actions_discarded_total",
        "Total number of actions dispatched after the store stopped"
    );
    describe_histogram!(
        "flow_reducer_duration_seconds",
        "Time taken to run the reducer for one action"
    );
    describe_counter!(
        "flow_changes_published_total",
        "Total number of change notifications delivered to subscribers"
    );
    describe_gauge!(
        "flow_subscribers",
        "Number of live change stream subscriptions"
    );
}

/// Per-store metric recorder.
///
/// Labels every metric with the store name; a disabled recorder is a no-op.
#[derive(Debug, Clone)]
pub(crate) struct StoreMetrics {
    store: Option<Arc<str>>,
}

impl StoreMetrics {
    pub(crate) fn new(name: &str, enabled: bool) -> Self {
        Self {
            store: enabled.then(|| Arc::from(name)),
        }
    }

    pub(crate) fn record_dispatch(&self) {
        if let Some(store) = &self.store {
            metrics::counter!("flow_actions_dispatched_total", "store" => store.to_string())
                .increment(1);
        }
    }

    pub(crate) fn record_discard(&self) {
        if let Some(store) = &self.store {
            metrics::counter!("flow_actions_discarded_total", "store" => store.to_string())
                .increment(1);
        }
    }

    pub(crate) fn record_reduction(&self, duration: Duration) {
        if let Some(store) = &self.store {
            metrics::counter!("flow_actions_reduced_total", "store" => store.to_string())
                .increment(1);
            metrics::histogram!("flow_reducer_duration_seconds", "store" => store.to_string())
                .record(duration.as_secs_f64());
        }
    }

    pub(crate) fn record_publish(&self, delivered: usize) {
        if let Some(store) = &self.store {
            metrics::counter!("flow_changes_published_total", "store" => store.to_string())
                .increment(delivered as u64);
        }
        self.record_subscribers(delivered);
    }

    pub(crate) fn record_subscribers(&self, count: usize) {
        if let Some(store) = &self.store {
            // Note: Precision loss acceptable for gauge values (subscriber counts < 2^52)
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!("flow_subscribers", "store" => store.to_string()).set(count as f64);
        }
    }
}

//! # Prometheus Metrics
//!
//! Operational metrics for the ledger node, scraped by Prometheus at the
//! `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] under
//! the `coffer` namespace so they do not collide with any default global
//! registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use coffer_contracts::LedgerError;

/// Holds all Prometheus metric handles for the node.
///
/// Prometheus handles are `Arc`-backed, so clones share the same series.
#[derive(Clone)]
pub struct LedgerMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Completed deposits.
    pub deposits_total: IntCounter,
    /// Completed withdrawals.
    pub withdrawals_total: IntCounter,
    /// Refused operations, labelled by error kind.
    pub rejected_operations_total: IntCounterVec,
    /// Deposits and withdrawals that failed at the settlement layer.
    pub transfer_failures_total: IntCounter,
    /// 1 while the ledger is paused.
    pub paused: IntGauge,
    /// Size of the asset allow-list.
    pub allowed_assets: IntGauge,
    /// Latency of mutating ledger operations, persistence included.
    pub operation_latency_seconds: Histogram,
    /// Committed operations whose snapshot could not be written.
    pub persist_failures_total: IntCounter,
    /// 1 while the on-disk snapshot lags the live ledger.
    pub degraded: IntGauge,
    /// JSON-RPC calls received, labelled by method.
    pub rpc_requests_total: IntCounterVec,
}

impl LedgerMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("coffer".into()), None)
            .expect("failed to create prometheus registry");

        let deposits_total = IntCounter::new("deposits_total", "Total number of completed deposits")
            .expect("metric creation");
        registry
            .register(Box::new(deposits_total.clone()))
            .expect("metric registration");

        let withdrawals_total =
            IntCounter::new("withdrawals_total", "Total number of completed withdrawals")
                .expect("metric creation");
        registry
            .register(Box::new(withdrawals_total.clone()))
            .expect("metric registration");

        let rejected_operations_total = IntCounterVec::new(
            Opts::new(
                "rejected_operations_total",
                "Ledger operations refused, by error kind",
            ),
            &["kind"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(rejected_operations_total.clone()))
            .expect("metric registration");

        let transfer_failures_total = IntCounter::new(
            "transfer_failures_total",
            "Deposits and withdrawals that failed at the settlement layer",
        )
        .expect("metric creation");
        registry
            .register(Box::new(transfer_failures_total.clone()))
            .expect("metric registration");

        let paused = IntGauge::new("paused", "1 while the ledger is paused, 0 otherwise")
            .expect("metric creation");
        registry
            .register(Box::new(paused.clone()))
            .expect("metric registration");

        let allowed_assets = IntGauge::new("allowed_assets", "Number of allow-listed asset types")
            .expect("metric creation");
        registry
            .register(Box::new(allowed_assets.clone()))
            .expect("metric registration");

        let operation_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Mutating ledger operation latency in seconds, persistence included",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("metric registration");

        let persist_failures_total = IntCounter::new(
            "persist_failures_total",
            "Committed ledger operations whose snapshot write failed",
        )
        .expect("metric creation");
        registry
            .register(Box::new(persist_failures_total.clone()))
            .expect("metric registration");

        let degraded = IntGauge::new(
            "degraded",
            "1 while the persisted snapshot lags the live ledger, 0 otherwise",
        )
        .expect("metric creation");
        registry
            .register(Box::new(degraded.clone()))
            .expect("metric registration");

        let rpc_requests_total = IntCounterVec::new(
            Opts::new("rpc_requests_total", "JSON-RPC calls received, by method"),
            &["method"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(rpc_requests_total.clone()))
            .expect("metric registration");

        Self {
            registry,
            deposits_total,
            withdrawals_total,
            rejected_operations_total,
            transfer_failures_total,
            paused,
            allowed_assets,
            operation_latency_seconds,
            persist_failures_total,
            degraded,
            rpc_requests_total,
        }
    }

    /// Counts a refused operation under its error kind.
    pub fn record_rejection(&self, err: &LedgerError) {
        self.rejected_operations_total
            .with_label_values(&[err.kind()])
            .inc();
        if matches!(err, LedgerError::TransferFailed(_)) {
            self.transfer_failures_total.inc();
        }
    }

    /// Refreshes the state gauges from the live ledger.
    pub fn sync_gauges(&self, paused: bool, allowed_assets: usize) {
        self.paused.set(i64::from(paused));
        self.allowed_assets.set(allowed_assets as i64);
    }

    /// Counts one JSON-RPC call. Unknown methods share a single label.
    pub fn record_rpc(&self, method: &str, known: bool) {
        let label = if known { method } else { "unknown" };
        self.rpc_requests_total.with_label_values(&[label]).inc();
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<LedgerMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

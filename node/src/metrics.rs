//! # Prometheus Metrics
//!
//! Exposes operational metrics for the relay node. Scraped by Prometheus at
//! the `/metrics` HTTP endpoint on the configured metrics port (and mirrored
//! on the API port).
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers. The engine
//! feeds them through the [`RelayObserver`] hooks.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

use shipsync_protocol::relay::RelayObserver;
use shipsync_protocol::wire::RelayResponse;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Responses sent, by message kind, ACK/NACK, and error code.
    pub responses_total: IntCounterVec,
    /// Failed forward attempts to the next hop.
    pub forward_failures_total: IntCounter,
    /// Transactions that reached COMPLETED on this node.
    pub completions_total: IntCounter,
    /// Transactions left for an operator to reconcile.
    pub reconciliation_needed_total: IntCounter,
    /// Time from accepting a connection to writing its response.
    pub request_latency_seconds: HistogramVec,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("shipsync".into()), None)?;

        let responses_total = IntCounterVec::new(
            Opts::new("responses_total", "Relay responses sent"),
            &["kind", "status", "code"],
        )?;
        registry.register(Box::new(responses_total.clone()))?;

        let forward_failures_total = IntCounter::new(
            "forward_failures_total",
            "Failed forward attempts to the next hop",
        )?;
        registry.register(Box::new(forward_failures_total.clone()))?;

        let completions_total = IntCounter::new(
            "completions_total",
            "Transactions completed on this node",
        )?;
        registry.register(Box::new(completions_total.clone()))?;

        let reconciliation_needed_total = IntCounter::new(
            "reconciliation_needed_total",
            "Transactions held for reconciliation",
        )?;
        registry.register(Box::new(reconciliation_needed_total.clone()))?;

        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "request_latency_seconds",
                "Connection accept to response written, in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["kind"],
        )?;
        registry.register(Box::new(request_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            responses_total,
            forward_failures_total,
            completions_total,
            reconciliation_needed_total,
            request_latency_seconds,
        })
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

impl RelayObserver for NodeMetrics {
    fn on_response(&self, kind: &str, response: &RelayResponse, elapsed: Duration) {
        let status = if response.is_ack() { "ACK" } else { "NACK" };
        let code = response.code.map(|c| c.as_str()).unwrap_or("");
        self.responses_total
            .with_label_values(&[kind, status, code])
            .inc();
        self.request_latency_seconds
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    fn on_forward_failed(&self, _transaction_id: &str) {
        self.forward_failures_total.inc();
    }

    fn on_completed(&self, _transaction_id: &str) {
        self.completions_total.inc();
    }

    fn on_reconciliation_needed(&self, _transaction_id: &str) {
        self.reconciliation_needed_total.inc();
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Render the registry as a Prometheus text response.
pub fn render(metrics: &NodeMetrics) -> Response {
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

/// Axum handler that renders `/metrics` on the dedicated metrics port.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    render(&metrics)
}

//! # Prometheus Metrics
//!
//! Operational metrics for the service, scraped from `/metrics` on the
//! dedicated metrics port. Registered in a custom registry under the
//! `claimtree` namespace so nothing collides with default-registry users.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// All metric handles for the service. Handles are cheap to clone and
/// internally shared; pass this around inside an `Arc`.
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    /// Total HTTP requests received, across every route.
    pub http_requests_total: IntCounter,
    /// Whitelist CSVs accepted by the upload gate and stored.
    pub whitelists_uploaded_total: IntCounter,
    /// Whitelist CSVs deleted.
    pub whitelists_deleted_total: IntCounter,
    /// Merkle trees that reached COMPLETED.
    pub trees_created_total: IntCounter,
    /// Merkle trees fully deleted.
    pub trees_deleted_total: IntCounter,
    /// Proof rows written by successful tree builds.
    pub proof_rows_written_total: IntCounter,
    /// Wall-clock seconds per successful tree build (fetch + gate + build
    /// + all KV writes).
    pub tree_build_seconds: Histogram,
}

impl ServiceMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("claimtree".into()), None)
            .expect("failed to create prometheus registry");

        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let c = IntCounter::new(name, help).expect("metric creation");
            registry.register(Box::new(c.clone())).expect("metric registration");
            c
        }

        let http_requests_total = counter(
            &registry,
            "http_requests_total",
            "Total HTTP requests received",
        );
        let whitelists_uploaded_total = counter(
            &registry,
            "whitelists_uploaded_total",
            "Whitelist CSVs accepted and stored",
        );
        let whitelists_deleted_total = counter(
            &registry,
            "whitelists_deleted_total",
            "Whitelist CSVs deleted",
        );
        let trees_created_total = counter(
            &registry,
            "trees_created_total",
            "Merkle trees that reached COMPLETED",
        );
        let trees_deleted_total =
            counter(&registry, "trees_deleted_total", "Merkle trees deleted");
        let proof_rows_written_total = counter(
            &registry,
            "proof_rows_written_total",
            "Proof rows written by successful builds",
        );

        let tree_build_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "tree_build_seconds",
                "Wall-clock seconds per successful tree build",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(tree_build_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            http_requests_total,
            whitelists_uploaded_total,
            whitelists_deleted_total,
            trees_created_total,
            trees_deleted_total,
            proof_rows_written_total,
            tree_build_seconds,
        }
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics handle for axum state.
pub type SharedMetrics = Arc<ServiceMetrics>;

/// Axum handler rendering `/metrics`.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_encode() {
        let metrics = ServiceMetrics::new();
        metrics.http_requests_total.inc();
        metrics.trees_created_total.inc();
        metrics.proof_rows_written_total.inc_by(42);
        metrics.tree_build_seconds.observe(0.2);

        let body = metrics.encode().unwrap();
        assert!(body.contains("claimtree_http_requests_total 1"));
        assert!(body.contains("claimtree_trees_created_total 1"));
        assert!(body.contains("claimtree_proof_rows_written_total 42"));
        assert!(body.contains("claimtree_tree_build_seconds"));
    }
}

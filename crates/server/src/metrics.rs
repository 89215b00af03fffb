//! Prometheus exporter wiring for the process-wide latency registry (§4.7).
//!
//! `phone_agent_core::latency_metrics()` already mirrors every recorded
//! sample into the global `metrics` recorder via `metrics::histogram!`; this
//! module only installs the recorder and serves its render output.

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the process-wide Prometheus recorder. Must be called once,
/// before any `metrics::histogram!`/`counter!` call fires.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// A standalone `/metrics` router, merged into the main one in `main.rs` so
/// the handle doesn't need to live on `AppState`.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}

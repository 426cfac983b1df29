//! Prometheus metrics endpoint and recorder setup.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Bucket bounds in seconds for handler latency histograms.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Installs the process-wide recorder. Every series carries an `app` label
/// next to the per-component `service` label.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .add_global_label("app", crate::SERVICE_NAME)
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )?
        .install_recorder()
}

/// GET /metrics: returns Prometheus-formatted metrics.
///
/// The recorder has no background upkeep task, so histograms are drained
/// here before rendering.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.run_upkeep();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        handle.render(),
    )
}

// crates/server/src/metrics.rs
//! Prometheus export of the job metrics.
//!
//! The job core records through the `metrics` facade. This module installs the
//! recorder those calls land in and serves it at `GET /metrics`.

use std::sync::{Arc, OnceLock};

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

const JOB_DURATION: &str = "reelrun_job_duration_seconds";

/// Pipeline runs take from seconds (`--test`) to the better part of an hour (`--batch`).
const JOB_DURATION_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0,
];

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Returns `false` if this process already did.
///
/// Concurrent callers block until the first one has finished installing.
pub fn init_metrics() -> bool {
    let mut installed = false;
    PROMETHEUS.get_or_init(|| {
        installed = true;
        install_recorder()
    });
    installed
}

fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(JOB_DURATION.to_string()), JOB_DURATION_BUCKETS)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Job duration buckets rejected, exporting a summary");
            PrometheusBuilder::new()
        });

    let recorder = builder.build_recorder();
    let handle = recorder.handle();
    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Another metrics recorder is installed, /metrics will stay empty");
    }

    describe_counter!(
        "reelrun_jobs_submitted_total",
        "Jobs accepted for execution, by mode"
    );
    describe_counter!(
        "reelrun_jobs_finished_total",
        "Jobs that reached a terminal status, by status"
    );
    describe_histogram!(
        JOB_DURATION,
        Unit::Seconds,
        "Time from submission to terminal status"
    );
    describe_gauge!("reelrun_jobs_running", "Jobs currently processing");
    describe_gauge!(
        "reelrun_hub_subscribers",
        "Live WebSocket and SSE event subscribers"
    );

    tracing::info!("Prometheus metrics initialized");
    handle
}

/// Current metrics in Prometheus text format, or `None` before [`init_metrics`].
pub fn render_metrics() -> Option<String> {
    PROMETHEUS.get().map(PrometheusHandle::render)
}

/// GET /metrics - 503 until the recorder is installed.
async fn metrics_handler() -> Response {
    match render_metrics() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized").into_response(),
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(metrics_handler))
}

//! Prometheus metrics wiring (SPEC_FULL.md ambient "Metrics" section).

use axum::{http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_gauge!("sessions_active", "Number of live video chat sessions");
        metrics::describe_counter!(
            "sessions_created_total",
            "Total number of sessions ever created"
        );
        metrics::describe_counter!(
            "upstream_polls_total",
            "Total upstream polls, labeled by outcome"
        );
        metrics::describe_counter!(
            "heal_attempts_total",
            "Total auto-heal attempts, labeled by outcome"
        );
        metrics::describe_counter!(
            "events_delivered_total",
            "Total events queued for delivery, labeled by adapter"
        );
        metrics::describe_counter!(
            "outbox_dropped_total",
            "Total payloads dropped from a sink's outbox under overflow"
        );

        Self { handle }
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the Prometheus text exposition format.
pub async fn metrics_handler(handle: axum::extract::State<PrometheusHandle>) -> impl IntoResponse {
    (StatusCode::OK, handle.render())
}

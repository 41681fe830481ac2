//! Prometheus metrics for incident and remediation observability.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record an inbound error report.
pub fn webhook_received(source: &str) {
    counter!("sanos_webhooks_received_total", "source" => source.to_string()).increment(1);
}

/// Record an ingest decision (`created` or `duplicate`).
pub fn incident_ingested(outcome: &str) {
    counter!("sanos_incidents_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record one repository tool invocation.
pub fn tool_called(tool: &str, outcome: &str) {
    counter!(
        "sanos_tool_calls_total",
        "tool" => tool.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a finished remediation run.
pub fn remediation_finished(outcome: &str, duration_ms: u64) {
    counter!("sanos_remediations_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("sanos_remediation_duration_ms").record(duration_ms as f64);
}

/// Record a deployment status transition.
pub fn deployment_status_changed(status: &str) {
    counter!("sanos_deployment_transitions_total", "status" => status.to_string()).increment(1);
}

//! Error-report webhook: instrumented apps post runtime errors here.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::models::incident::IncidentSource;
use crate::services::incident_service::{self, ErrorReport};
use crate::services::store::IncidentStore;

#[derive(Debug, Deserialize)]
pub struct ErrorReportPayload {
    pub webhook_key: String,
    pub source: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub logs: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorReportResponse {
    pub status: &'static str,
    pub incident_id: i64,
}

/// Metrics label for reports whose source is not accepted.
const REJECTED_SOURCE: &str = "rejected";

fn accepted_source(raw: &str) -> Option<IncidentSource> {
    IncidentSource::parse(raw).filter(IncidentSource::accepted_by_webhook)
}

fn source_label(source: Option<IncidentSource>) -> &'static str {
    source.map_or(REJECTED_SOURCE, |s| s.as_str())
}

/// Validate and ingest one error report.
pub async fn handle_error_report(
    store: &dyn IncidentStore,
    payload: ErrorReportPayload,
) -> Result<ErrorReportResponse, StatusCode> {
    let source = accepted_source(&payload.source);
    crate::metrics::webhook_received(source_label(source));
    let source = source.ok_or_else(|| {
        tracing::debug!(source = %payload.source, "rejecting report from unsupported source");
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    let report = ErrorReport {
        webhook_key: payload.webhook_key,
        source,
        error_message: payload.error_message,
        stack_trace: payload.stack_trace,
        logs: payload.logs,
    };

    let outcome = incident_service::ingest(store, report)
        .await
        .map_err(super::error_status)?;

    Ok(ErrorReportResponse {
        status: outcome.label(),
        incident_id: outcome.incident_id(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(raw: &str) -> &'static str {
        source_label(accepted_source(raw))
    }

    #[test]
    fn metric_labels_are_bounded_to_known_sources() {
        assert_eq!(label("server"), "server");
        assert_eq!(label("client-global"), "client-global");
        assert_eq!(label("datadog"), "rejected");
        assert_eq!(label("totally-made-up-1"), "rejected");
        assert_eq!(label("totally-made-up-2"), "rejected");
        assert_eq!(label(""), "rejected");
    }
}

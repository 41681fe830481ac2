//! Incident ingestion: the dedup gate in front of the incidents table.

use serde::Deserialize;

use super::store::IncidentStore;
use crate::error::{Result, SanosError};
use crate::models::incident::{
    fingerprint, Incident, IncidentSource, IncidentStatus, IncidentType, NewIncident,
};

/// One inbound error report, already resolved to a known source.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorReport {
    pub webhook_key: String,
    pub source: IncidentSource,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub logs: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Created(i64),
    /// An identical open incident already exists.
    Duplicate(i64),
}

impl IngestOutcome {
    pub fn incident_id(&self) -> i64 {
        match self {
            Self::Created(id) | Self::Duplicate(id) => *id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Duplicate(_) => "duplicate",
        }
    }
}

/// Record an error report, collapsing it into the open incident with the same
/// (app, source, message) when there is one.
pub async fn ingest(store: &dyn IncidentStore, report: ErrorReport) -> Result<IngestOutcome> {
    if report.error_message.trim().is_empty() {
        return Err(SanosError::InvalidInput("error_message is required".into()));
    }

    let app = store
        .find_app_by_webhook_key(&report.webhook_key)
        .await?
        .ok_or_else(|| SanosError::NotFound("app for webhook key".into()))?;
    let source = report.source.as_str();

    if let Some(existing) = store
        .find_open_incident(app.id, source, &report.error_message)
        .await?
    {
        return Ok(record(app.id, IngestOutcome::Duplicate(existing.id)));
    }

    let new_incident = NewIncident {
        app_id: app.id,
        incident_type: IncidentType::RuntimeError.as_str().to_string(),
        source: source.to_string(),
        status: IncidentStatus::Open.as_str().to_string(),
        error_fingerprint: fingerprint(&report.error_message),
        error_message: report.error_message.clone(),
        stack_trace: report.stack_trace,
        logs: report.logs,
    };

    match store.insert_incident(new_incident).await? {
        Some(incident) => Ok(record(app.id, IngestOutcome::Created(incident.id))),
        None => {
            // A concurrent identical report won the unique index.
            let winner = store
                .find_open_incident(app.id, source, &report.error_message)
                .await?
                .ok_or_else(|| {
                    SanosError::Database("open incident conflict without a visible winner".into())
                })?;
            Ok(record(app.id, IngestOutcome::Duplicate(winner.id)))
        }
    }
}

fn record(app_id: i64, outcome: IngestOutcome) -> IngestOutcome {
    tracing::info!(
        app_id,
        incident_id = outcome.incident_id(),
        outcome = outcome.label(),
        "error report ingested"
    );
    crate::metrics::incident_ingested(outcome.label());
    outcome
}

pub async fn get_incident(store: &dyn IncidentStore, incident_id: i64) -> Result<Incident> {
    store
        .get_incident(incident_id)
        .await?
        .ok_or_else(|| SanosError::NotFound(format!("incident {incident_id}")))
}

/// Close an incident. A later identical report opens a fresh one.
pub async fn resolve(store: &dyn IncidentStore, incident_id: i64) -> Result<Incident> {
    get_incident(store, incident_id).await?;
    store
        .set_incident_status(incident_id, IncidentStatus::Resolved)
        .await?;
    tracing::info!(incident_id, "incident resolved");
    get_incident(store, incident_id).await
}

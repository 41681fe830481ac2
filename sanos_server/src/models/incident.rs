//! incidents: one deduplicated error condition for one app.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::incidents;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = incidents)]
pub struct Incident {
    pub id: i64,
    pub app_id: i64,
    pub incident_type: String,
    pub source: String,
    pub status: String,
    pub error_message: String,
    pub error_fingerprint: String,
    pub stack_trace: Option<String>,
    pub logs: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = incidents)]
pub struct NewIncident {
    pub app_id: i64,
    pub incident_type: String,
    pub source: String,
    pub status: String,
    pub error_message: String,
    pub error_fingerprint: String,
    pub stack_trace: Option<String>,
    pub logs: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    RuntimeError,
    BuildError,
    ThresholdBreach,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuntimeError => "runtime_error",
            Self::BuildError => "build_error",
            Self::ThresholdBreach => "threshold_breach",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentSource {
    #[serde(rename = "server")]
    Server,
    #[serde(rename = "client-global")]
    ClientGlobal,
    #[serde(rename = "datadog")]
    Datadog,
    #[serde(rename = "vercel")]
    Vercel,
}

impl IncidentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::ClientGlobal => "client-global",
            Self::Datadog => "datadog",
            Self::Vercel => "vercel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "server" => Some(Self::Server),
            "client-global" => Some(Self::ClientGlobal),
            "datadog" => Some(Self::Datadog),
            "vercel" => Some(Self::Vercel),
            _ => None,
        }
    }

    /// Sources an instrumented app may report through the error webhook.
    pub fn accepted_by_webhook(&self) -> bool {
        matches!(self, Self::Server | Self::ClientGlobal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Analyzing,
    PrCreated,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Analyzing => "analyzing",
            Self::PrCreated => "pr_created",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "analyzing" => Some(Self::Analyzing),
            "pr_created" => Some(Self::PrCreated),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// Dedup fingerprint of an error message: hex SHA-256 of the exact text.
pub fn fingerprint(error_message: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(error_message.as_bytes()))
}

//! analyses: one remediation attempt against an incident.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::analyses;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = analyses)]
pub struct Analysis {
    pub id: i64,
    pub incident_id: i64,
    pub model: String,
    pub prompt: String,
    pub root_cause: Option<String>,
    pub suggested_fix: Option<serde_json::Value>,
    pub files_analyzed: serde_json::Value,
    pub commits_analyzed: serde_json::Value,
    pub pr_url: Option<String>,
    pub pr_number: Option<i32>,
    pub branch_name: Option<String>,
    pub tokens_used: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = analyses)]
pub struct NewAnalysis {
    pub incident_id: i64,
    pub model: String,
    pub prompt: String,
    pub root_cause: Option<String>,
    pub suggested_fix: Option<serde_json::Value>,
    pub files_analyzed: serde_json::Value,
    pub commits_analyzed: serde_json::Value,
    pub pr_url: Option<String>,
    pub pr_number: Option<i32>,
    pub branch_name: Option<String>,
    pub tokens_used: Option<i64>,
}

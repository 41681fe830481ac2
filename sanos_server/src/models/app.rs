//! apps: a monitored application bound to a GitHub repo and, once deployed,
//! a Vercel project.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::apps;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = apps)]
pub struct App {
    pub id: i64,
    pub repo_owner: String,
    pub repo_name: String,
    pub webhook_key: String,
    pub vercel_project_id: Option<String>,
    pub deployment_status: String,
    pub live_url: Option<String>,
    pub instrumented: bool,
    pub created_at: DateTime<Utc>,
}

impl App {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.repo_owner, self.repo_name)
    }

    /// Cached deployment status. Unreadable values read as `pending`.
    pub fn deployment(&self) -> DeploymentStatus {
        DeploymentStatus::parse(&self.deployment_status).unwrap_or_default()
    }
}

/// Lifecycle of the app's current deployment attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    #[default]
    Pending,
    Deploying,
    Ready,
    Error,
    Canceled,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deploying => "deploying",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "deploying" => Some(Self::Deploying),
            "ready" => Some(Self::Ready),
            "error" => Some(Self::Error),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Terminal for the in-flight attempt; the poller stops asking the provider.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Canceled)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

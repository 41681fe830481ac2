//! REST API for apps, logs, deployments and incident remediation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::SanosRouterState;
use crate::error::{Result, SanosError};
use crate::models::analysis::Analysis;
use crate::models::app::{App, DeploymentStatus};
use crate::models::incident::{Incident, IncidentStatus};
use crate::services::deployment_service;
use crate::services::github_service::GithubClient;
use crate::services::log_store::LogChannel;
use crate::services::{incident_service, remediation_service};

pub const DEFAULT_LOG_LIMIT: i64 = 50;
pub const MAX_LOG_LIMIT: i64 = 500;

// ── Logs ──

#[derive(Debug, Serialize)]
pub struct LogsJson {
    pub app_id: i64,
    pub log_type: String,
    pub logs: Vec<String>,
    pub count: usize,
}

fn validate_limit(limit: Option<i64>) -> Result<usize> {
    let limit = limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if !(1..=MAX_LOG_LIMIT).contains(&limit) {
        return Err(SanosError::InvalidInput(format!(
            "limit must be between 1 and {MAX_LOG_LIMIT}"
        )));
    }
    Ok(limit as usize)
}

async fn require_app(state: &SanosRouterState, app_id: i64) -> Result<App> {
    state
        .store
        .get_app(app_id)
        .await?
        .ok_or_else(|| SanosError::NotFound(format!("app {app_id}")))
}

/// Tail one of an app's log channels. Deploy-provider logs are refreshed
/// from the provider first while a deployment is in flight.
pub async fn get_logs(
    state: &SanosRouterState,
    app_id: i64,
    log_type: &str,
    limit: Option<i64>,
) -> Result<LogsJson> {
    let channel = LogChannel::parse(log_type)
        .ok_or_else(|| SanosError::InvalidInput(format!("unknown log type {log_type}")))?;
    let limit = validate_limit(limit)?;
    let app = require_app(state, app_id).await?;

    if channel == LogChannel::DeployProvider {
        deployment_service::refresh_deploy_logs(state.deployments.as_ref(), &state.log_store, &app)
            .await;
    }

    let logs = state.log_store.get(app_id, channel, Some(limit));
    Ok(LogsJson {
        app_id,
        log_type: log_type.to_string(),
        count: logs.len(),
        logs,
    })
}

// ── Apps ──

#[derive(Debug, Serialize)]
pub struct AppJson {
    pub id: i64,
    pub repo_owner: String,
    pub repo_name: String,
    pub full_name: String,
    pub vercel_project_id: Option<String>,
    pub deployment_status: DeploymentStatus,
    pub live_url: Option<String>,
    pub instrumented: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// `None` when GitHub could not be asked.
    pub private: Option<bool>,
    pub permissions: Option<serde_json::Value>,
}

/// All apps, each with repository visibility looked up on GitHub.
pub async fn list_apps(state: &SanosRouterState) -> Result<Vec<AppJson>> {
    let apps = state.store.list_apps().await?;
    let github = GithubClient::new(
        &state.config.github_api_base,
        &state.config.github_token,
        Duration::from_secs(state.config.github_timeout_secs),
    );

    let mut out = Vec::with_capacity(apps.len());
    for app in apps {
        let details = match &github {
            Ok(client) => match client.repo_details(&app.repo_owner, &app.repo_name).await {
                Ok(details) => Some(details),
                Err(e) => {
                    tracing::warn!(app_id = app.id, repo = %app.full_name(), error = %e, "repository lookup failed");
                    None
                }
            },
            Err(_) => None,
        };

        out.push(AppJson {
            id: app.id,
            full_name: app.full_name(),
            deployment_status: app.deployment(),
            private: details.as_ref().map(|d| d.private),
            permissions: details.and_then(|d| d.permissions),
            repo_owner: app.repo_owner,
            repo_name: app.repo_name,
            vercel_project_id: app.vercel_project_id,
            live_url: app.live_url,
            instrumented: app.instrumented,
            created_at: app.created_at,
        });
    }
    Ok(out)
}

// ── Incidents ──

#[derive(Debug, Serialize)]
pub struct RemediationJson {
    pub success: bool,
    pub incident_id: i64,
    pub incident_status: IncidentStatus,
    pub analysis: Analysis,
    pub agent_output: String,
}

#[derive(Debug, Serialize)]
pub struct RemediationFailureJson {
    pub success: bool,
    pub error: String,
    pub transcript: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RemediateRequest {
    /// Overrides the configured GitHub token for this run.
    pub github_token: Option<String>,
}

pub async fn remediate(
    state: &SanosRouterState,
    incident_id: i64,
    request: RemediateRequest,
) -> std::result::Result<RemediationJson, (SanosError, RemediationFailureJson)> {
    let token = request
        .github_token
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| state.config.github_token.clone());

    match remediation_service::remediate_detached(
        Arc::clone(&state.store),
        Arc::clone(&state.runner),
        token,
        incident_id,
    )
    .await
    {
        Ok(report) => Ok(RemediationJson {
            success: true,
            incident_id,
            incident_status: report.incident_status,
            analysis: report.analysis,
            agent_output: report.agent_output,
        }),
        Err(e) => {
            let transcript = match state.store.get_incident(incident_id).await {
                Ok(Some(incident)) => {
                    state
                        .log_store
                        .get(incident.app_id, LogChannel::Agent, None)
                }
                _ => Vec::new(),
            };
            let body = RemediationFailureJson {
                success: false,
                error: format!("{}: {}", e.kind(), e),
                transcript,
            };
            Err((e, body))
        }
    }
}

pub async fn resolve(state: &SanosRouterState, incident_id: i64) -> Result<Incident> {
    incident_service::resolve(state.store.as_ref(), incident_id).await
}

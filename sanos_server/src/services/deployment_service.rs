//! Deployment status reconciliation against Vercel.
//!
//! The cached status on the app row is the source of truth between polls.
//! A poll only consults the provider while the status is non-terminal and a
//! project is associated; provider failures never surface to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use super::log_store::{LogChannel, LogStore};
use super::store::IncidentStore;
use crate::error::{Result, SanosError};
use crate::models::app::{App, DeploymentStatus};

/// Latest production deployment as reported by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderDeployment {
    pub uid: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, rename = "readyState")]
    pub ready_state: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub alias: Vec<String>,
}

impl ProviderDeployment {
    pub fn state_token(&self) -> Option<&str> {
        self.state.as_deref().or(self.ready_state.as_deref())
    }
}

#[async_trait]
pub trait DeploymentProvider: Send + Sync {
    async fn latest_production_deployment(
        &self,
        project_id: &str,
    ) -> Result<Option<ProviderDeployment>>;

    /// Custom domains attached to the project, in provider order.
    async fn project_domains(&self, project_id: &str) -> Result<Vec<String>>;

    /// Build output lines of one deployment.
    async fn deployment_events(&self, deployment_uid: &str) -> Result<Vec<String>>;
}

pub struct VercelClient {
    http: reqwest::Client,
    api_base: String,
}

impl VercelClient {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| SanosError::InvalidInput("Vercel token is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| SanosError::Transport(format!("failed to build Vercel client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{path}", self.api_base);
        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SanosError::remote(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| SanosError::Remote {
            status: status.as_u16(),
            message: format!("unexpected response body: {e}"),
        })
    }
}

#[async_trait]
impl DeploymentProvider for VercelClient {
    async fn latest_production_deployment(
        &self,
        project_id: &str,
    ) -> Result<Option<ProviderDeployment>> {
        #[derive(Deserialize)]
        struct DeploymentList {
            #[serde(default)]
            deployments: Vec<ProviderDeployment>,
        }

        let list: DeploymentList = self
            .get_json(
                "/v6/deployments",
                &[("projectId", project_id), ("target", "production"), ("limit", "1")],
            )
            .await?;
        Ok(list.deployments.into_iter().next())
    }

    async fn project_domains(&self, project_id: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct DomainList {
            #[serde(default)]
            domains: Vec<Domain>,
        }
        #[derive(Deserialize)]
        struct Domain {
            name: String,
        }

        let list: DomainList = self
            .get_json(&format!("/v9/projects/{project_id}/domains"), &[])
            .await?;
        Ok(list.domains.into_iter().map(|d| d.name).collect())
    }

    async fn deployment_events(&self, deployment_uid: &str) -> Result<Vec<String>> {
        let events: Vec<serde_json::Value> = self
            .get_json(&format!("/v2/deployments/{deployment_uid}/events"), &[])
            .await?;
        Ok(events
            .iter()
            .filter_map(|event| {
                event
                    .get("text")
                    .or_else(|| event.get("payload").and_then(|p| p.get("text")))
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
            })
            .collect())
    }
}

/// Map a provider state token onto our lifecycle. Unknown tokens map to `None`.
pub fn map_provider_state(token: &str) -> Option<DeploymentStatus> {
    match token.to_ascii_lowercase().as_str() {
        "building" | "initializing" | "queued" => Some(DeploymentStatus::Deploying),
        "ready" => Some(DeploymentStatus::Ready),
        "error" | "canceled" => Some(DeploymentStatus::Error),
        _ => None,
    }
}

fn with_scheme(host_or_url: &str) -> String {
    if host_or_url.starts_with("https://") || host_or_url.starts_with("http://") {
        host_or_url.to_string()
    } else {
        format!("https://{host_or_url}")
    }
}

/// Public URL of a ready deployment: first custom domain, then first alias,
/// then the raw deployment URL.
pub fn resolve_live_url(domains: &[String], aliases: &[String], url: Option<&str>) -> Option<String> {
    domains
        .iter()
        .chain(aliases.iter())
        .map(String::as_str)
        .chain(url)
        .find(|candidate| !candidate.trim().is_empty())
        .map(with_scheme)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentView {
    pub status: DeploymentStatus,
    pub live_url: Option<String>,
}

impl DeploymentView {
    fn cached(app: &App) -> Self {
        Self {
            status: app.deployment(),
            live_url: app.live_url.clone(),
        }
    }
}

/// Current deployment status of an app, advancing the cached state from the
/// provider when the cached state is still in flight.
pub async fn poll_status(
    store: &dyn IncidentStore,
    provider: &dyn DeploymentProvider,
    log_store: &LogStore,
    app_id: i64,
) -> Result<DeploymentView> {
    let app = store
        .get_app(app_id)
        .await?
        .ok_or_else(|| SanosError::NotFound(format!("app {app_id}")))?;
    let cached = DeploymentView::cached(&app);

    let Some(project_id) = app.vercel_project_id.as_deref() else {
        return Ok(cached);
    };
    if cached.status.is_terminal() {
        return Ok(cached);
    }

    match reconcile(store, provider, log_store, &app, project_id, &cached).await {
        Ok(view) => Ok(view),
        Err(e @ (SanosError::Remote { .. } | SanosError::Transport(_))) => {
            tracing::warn!(app_id, kind = e.kind(), error = %e, "deployment poll failed, returning cached status");
            Ok(cached)
        }
        Err(e) => Err(e),
    }
}

async fn reconcile(
    store: &dyn IncidentStore,
    provider: &dyn DeploymentProvider,
    log_store: &LogStore,
    app: &App,
    project_id: &str,
    cached: &DeploymentView,
) -> Result<DeploymentView> {
    let Some(deployment) = provider.latest_production_deployment(project_id).await? else {
        return Ok(cached.clone());
    };

    let status = match deployment.state_token() {
        Some(token) => map_provider_state(token).unwrap_or_else(|| {
            tracing::debug!(app_id = app.id, token, "unrecognised deployment state");
            cached.status
        }),
        None => cached.status,
    };

    if status != cached.status {
        store.set_deployment_status(app.id, status).await?;
        log_store.append(
            app.id,
            LogChannel::DeployProvider,
            &format!("[Vercel] Deployment {} -> {}", cached.status, status),
        );
        tracing::info!(app_id = app.id, from = %cached.status, to = %status, "deployment status changed");
        crate::metrics::deployment_status_changed(status.as_str());
    }

    let mut live_url = cached.live_url.clone();
    if status == DeploymentStatus::Ready {
        let domains = match provider.project_domains(project_id).await {
            Ok(domains) => domains,
            Err(e) => {
                tracing::warn!(app_id = app.id, error = %e, "domain lookup failed, falling back to aliases");
                Vec::new()
            }
        };
        if let Some(url) = resolve_live_url(&domains, &deployment.alias, deployment.url.as_deref()) {
            store.set_live_url(app.id, &url).await?;
            live_url = Some(url);
        }
    }

    Ok(DeploymentView { status, live_url })
}

/// Replace the app's deploy-provider channel with the current build output
/// while a deployment is in flight.
pub async fn refresh_deploy_logs(provider: &dyn DeploymentProvider, log_store: &LogStore, app: &App) {
    let Some(project_id) = app.vercel_project_id.as_deref() else {
        return;
    };
    if app.deployment() != DeploymentStatus::Deploying {
        return;
    }

    let fetched: Result<Option<Vec<String>>> = async {
        match provider.latest_production_deployment(project_id).await? {
            Some(deployment) => provider.deployment_events(&deployment.uid).await.map(Some),
            None => Ok(None),
        }
    }
    .await;

    match fetched {
        Ok(Some(lines)) => {
            if lines.iter().all(|l| l.trim().is_empty()) {
                log_store.replace(app.id, LogChannel::DeployProvider, ["Build starting..."]);
            } else {
                log_store.replace(app.id, LogChannel::DeployProvider, &lines);
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(app_id = app.id, error = %e, "build log refresh failed");
            log_store.append(
                app.id,
                LogChannel::DeployProvider,
                &format!("[Vercel] Failed to fetch build logs: {e}"),
            );
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Provider returning fixed answers; `None` fields fail with a transport error.
    #[derive(Default)]
    pub struct FakeDeployments {
        pub deployment: Option<Option<ProviderDeployment>>,
        pub domains: Option<Vec<String>>,
        pub events: Option<Vec<String>>,
        pub calls: AtomicUsize,
    }

    impl FakeDeployments {
        pub fn with_state(state: &str) -> Self {
            Self {
                deployment: Some(Some(ProviderDeployment {
                    uid: "dpl_1".to_string(),
                    state: Some(state.to_string()),
                    url: Some("shop-abc123.vercel.app".to_string()),
                    ..Default::default()
                })),
                domains: Some(Vec::new()),
                events: Some(Vec::new()),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn unavailable() -> SanosError {
        SanosError::Transport("connection refused".to_string())
    }

    #[async_trait]
    impl DeploymentProvider for FakeDeployments {
        async fn latest_production_deployment(&self, _: &str) -> Result<Option<ProviderDeployment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.deployment.clone().ok_or_else(unavailable)
        }

        async fn project_domains(&self, _: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.domains.clone().ok_or_else(unavailable)
        }

        async fn deployment_events(&self, _: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.events.clone().ok_or_else(unavailable)
        }
    }
}

//! Orchestrator HTTP routes: error webhook, log tailing, deployments, incidents.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::SanosConfig;
use crate::error::SanosError;
use crate::models::incident::Incident;
use crate::services::agent_runner::RemediationRunner;
use crate::services::deployment_service::{self, DeploymentProvider, DeploymentView};
use crate::services::log_store::LogStore;
use crate::services::store::IncidentStore;

/// Shared state for route handlers.
#[derive(Clone)]
pub struct SanosRouterState {
    pub store: Arc<dyn IncidentStore>,
    pub log_store: Arc<LogStore>,
    pub deployments: Arc<dyn DeploymentProvider>,
    pub runner: Arc<RemediationRunner>,
    pub config: SanosConfig,
}

/// Build the orchestrator's Axum router.
pub fn sanos_router(state: SanosRouterState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        // Webhook
        .route("/webhooks/logs", post(error_report_handler))
        // App API
        .route("/apps", get(list_apps_handler))
        .route("/apps/{app_id}/logs/{log_type}", get(get_logs_handler))
        .route("/apps/{app_id}/deployment", get(get_deployment_handler))
        // Incident API
        .route("/incidents/{incident_id}/remediate", post(remediate_handler))
        .route("/incidents/{incident_id}/resolve", post(resolve_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map a service error to its status, logging server-side failures.
pub(crate) fn error_status(e: SanosError) -> StatusCode {
    let status = e.status_code();
    if status.is_server_error() {
        tracing::error!(kind = e.kind(), error = %e, "request failed");
    } else {
        tracing::debug!(kind = e.kind(), error = %e, "request rejected");
    }
    status
}

// ── Webhook ──

async fn error_report_handler(
    State(state): State<SanosRouterState>,
    Json(payload): Json<webhook::ErrorReportPayload>,
) -> Result<Json<webhook::ErrorReportResponse>, StatusCode> {
    webhook::handle_error_report(state.store.as_ref(), payload)
        .await
        .map(Json)
}

// ── App API ──

#[derive(serde::Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
}

async fn get_logs_handler(
    State(state): State<SanosRouterState>,
    Path((app_id, log_type)): Path<(i64, String)>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<api::LogsJson>, StatusCode> {
    api::get_logs(&state, app_id, &log_type, query.limit)
        .await
        .map(Json)
        .map_err(error_status)
}

async fn get_deployment_handler(
    State(state): State<SanosRouterState>,
    Path(app_id): Path<i64>,
) -> Result<Json<DeploymentView>, StatusCode> {
    deployment_service::poll_status(
        state.store.as_ref(),
        state.deployments.as_ref(),
        &state.log_store,
        app_id,
    )
    .await
    .map(Json)
    .map_err(error_status)
}

async fn list_apps_handler(
    State(state): State<SanosRouterState>,
) -> Result<Json<Vec<api::AppJson>>, StatusCode> {
    api::list_apps(&state).await.map(Json).map_err(error_status)
}

// ── Incident API ──

async fn remediate_handler(
    State(state): State<SanosRouterState>,
    Path(incident_id): Path<i64>,
    body: Bytes,
) -> Result<Json<api::RemediationJson>, (StatusCode, Json<api::RemediationFailureJson>)> {
    let request: api::RemediateRequest = if body.is_empty() {
        api::RemediateRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            let failure = api::RemediationFailureJson {
                success: false,
                error: format!("InvalidInput: {e}"),
                transcript: Vec::new(),
            };
            (StatusCode::UNPROCESSABLE_ENTITY, Json(failure))
        })?
    };

    api::remediate(&state, incident_id, request)
        .await
        .map(Json)
        .map_err(|(e, body)| (error_status(e), Json(body)))
}

async fn resolve_handler(
    State(state): State<SanosRouterState>,
    Path(incident_id): Path<i64>,
) -> Result<Json<Incident>, StatusCode> {
    api::resolve(&state, incident_id)
        .await
        .map(Json)
        .map_err(error_status)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::models::app::DeploymentStatus;
    use crate::services::agent_runner::testing::ScriptedProvider;
    use crate::services::deployment_service::testing::FakeDeployments;
    use crate::services::log_store::LogChannel;
    use crate::services::store::memory::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        log_store: Arc<LogStore>,
        router: Router,
    }

    fn harness_with(base_url: &str, deployments: FakeDeployments, provider: ScriptedProvider) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let log_store = Arc::new(LogStore::default());
        let config = SanosConfig::for_tests(base_url);
        let runner = Arc::new(RemediationRunner::new(
            Arc::new(provider),
            log_store.clone(),
            &config,
        ));
        let state = SanosRouterState {
            store: store.clone(),
            log_store: log_store.clone(),
            deployments: Arc::new(deployments),
            runner,
            config,
        };
        Harness {
            store,
            log_store,
            router: sanos_router(state),
        }
    }

    fn idle_provider() -> ScriptedProvider {
        ScriptedProvider {
            calls: vec![],
            final_output: "nothing to do".to_string(),
            narration: String::new(),
            tokens: 0,
        }
    }

    fn harness() -> Harness {
        harness_with("http://127.0.0.1:9", FakeDeployments::default(), idle_provider())
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let h = harness();
        let (status, body) = send(&h.router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("ok".into()));
    }

    #[tokio::test]
    async fn webhook_creates_then_deduplicates() {
        let h = harness();
        h.store.add_app("key-1", None);
        let report = json!({
            "webhook_key": "key-1",
            "source": "server",
            "error_message": "TypeError: x is undefined",
            "stack_trace": "at f (a.js:1:1)"
        });

        let (status, first) = send(&h.router, post_json("/webhooks/logs", report.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["status"], "created");

        let (status, second) = send(&h.router, post_json("/webhooks/logs", report)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["status"], "duplicate");
        assert_eq!(second["incident_id"], first["incident_id"]);
    }

    #[tokio::test]
    async fn webhook_rejects_unknown_key_and_foreign_sources() {
        let h = harness();
        h.store.add_app("key-1", None);

        let (status, _) = send(
            &h.router,
            post_json(
                "/webhooks/logs",
                json!({"webhook_key": "nope", "source": "server", "error_message": "boom"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        for source in ["vercel", "datadog", "cron"] {
            let (status, _) = send(
                &h.router,
                post_json(
                    "/webhooks/logs",
                    json!({"webhook_key": "key-1", "source": source, "error_message": "boom"}),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "source {source}");
        }
        assert!(h.store.incidents().is_empty());
    }

    #[tokio::test]
    async fn logs_route_returns_tail_for_either_channel_name() {
        let h = harness();
        let app = h.store.add_app("key-1", None);
        for i in 1..=5 {
            h.log_store
                .append(app.id, LogChannel::Agent, &format!("line {i}"));
        }

        for name in ["dedalus", "agent"] {
            let (status, body) = send(
                &h.router,
                get(&format!("/apps/{}/logs/{name}?limit=2", app.id)),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["logs"], json!(["line 4", "line 5"]));
            assert_eq!(body["count"], 2);
            assert_eq!(body["log_type"], name);
        }

        let (_, body) = send(&h.router, get(&format!("/apps/{}/logs/dedalus", app.id))).await;
        assert_eq!(body["count"], 5);
    }

    #[tokio::test]
    async fn logs_route_validates_inputs() {
        let h = harness();
        let app = h.store.add_app("key-1", None);

        for uri in [
            format!("/apps/{}/logs/dedalus?limit=0", app.id),
            format!("/apps/{}/logs/dedalus?limit=501", app.id),
            format!("/apps/{}/logs/datadog", app.id),
        ] {
            let (status, _) = send(&h.router, get(&uri)).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        }

        let (status, _) = send(&h.router, get("/apps/999/logs/vercel")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deployment_route_survives_provider_outage() {
        let h = harness();
        let app = h.store.add_app("key-1", Some("prj_1"));
        h.store.set_app_status(app.id, DeploymentStatus::Deploying);

        let (status, body) = send(&h.router, get(&format!("/apps/{}/deployment", app.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "deploying", "live_url": null}));

        let (status, _) = send(&h.router, get("/apps/999/deployment")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deployment_route_reports_ready_with_live_url() {
        let h = harness_with(
            "http://127.0.0.1:9",
            FakeDeployments::with_state("READY"),
            idle_provider(),
        );
        let app = h.store.add_app("key-1", Some("prj_1"));

        let (status, body) = send(&h.router, get(&format!("/apps/{}/deployment", app.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "ready", "live_url": "https://shop-abc123.vercel.app"})
        );

        let (_, logs) = send(&h.router, get(&format!("/apps/{}/logs/vercel", app.id))).await;
        assert_eq!(logs["logs"], json!(["[Vercel] Deployment pending -> ready"]));
    }

    #[tokio::test]
    async fn list_apps_reports_unknown_visibility_as_null() {
        let h = harness();
        h.store.add_app("key-1", None);

        let (status, body) = send(&h.router, get("/apps")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["full_name"], "acme/shop");
        assert_eq!(body[0]["private"], Value::Null);
        assert!(body[0].get("webhook_key").is_none());
    }

    #[tokio::test]
    async fn list_apps_includes_repository_visibility() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/repos/acme/shop");
            then.status(200).json_body(json!({
                "private": true,
                "permissions": {"admin": false, "push": true, "pull": true}
            }));
        });
        let h = harness_with(&server.base_url(), FakeDeployments::default(), idle_provider());
        h.store.add_app("key-1", None);

        let (_, body) = send(&h.router, get("/apps")).await;
        assert_eq!(body[0]["private"], true);
        assert_eq!(body[0]["permissions"]["push"], true);
    }

    #[tokio::test]
    async fn remediate_and_resolve_round_trip() {
        let h = harness();
        let app = h.store.add_app("key-1", None);
        let (_, created) = send(
            &h.router,
            post_json(
                "/webhooks/logs",
                json!({"webhook_key": "key-1", "source": "client-global", "error_message": "boom"}),
            ),
        )
        .await;
        let incident_id = created["incident_id"].as_i64().unwrap();

        let (status, body) = send(
            &h.router,
            post_json(&format!("/incidents/{incident_id}/remediate"), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["incident_status"], "open");
        assert_eq!(body["analysis"]["root_cause"], "nothing to do");
        assert_eq!(
            h.log_store.get(app.id, LogChannel::Agent, None).last().map(String::as_str),
            Some("[Agent] Agent completed successfully.")
        );

        let (status, body) = send(
            &h.router,
            Request::post(format!("/incidents/{incident_id}/resolve"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "resolved");
    }

    #[tokio::test]
    async fn failed_remediation_returns_transcript() {
        let provider = ScriptedProvider {
            calls: vec![(
                "get_file_content".to_string(),
                json!({"owner": "acme", "repo": "shop", "path": "src/a.ts"}),
            )],
            final_output: String::new(),
            narration: "Reading src/a.ts\n".to_string(),
            tokens: 0,
        };
        let h = harness_with("http://127.0.0.1:9", FakeDeployments::default(), provider);
        h.store.add_app("key-1", None);
        let (_, created) = send(
            &h.router,
            post_json(
                "/webhooks/logs",
                json!({"webhook_key": "key-1", "source": "server", "error_message": "boom"}),
            ),
        )
        .await;
        let incident_id = created["incident_id"].as_i64().unwrap();

        let (status, body) = send(
            &h.router,
            Request::post(format!("/incidents/{incident_id}/remediate"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().starts_with("TransportError"));
        let transcript = body["transcript"].as_array().unwrap();
        assert_eq!(transcript[0], "[Agent] Starting agent...");
        assert_eq!(transcript[1], "Reading src/a.ts");
        assert!(transcript
            .last()
            .and_then(Value::as_str)
            .unwrap()
            .starts_with("[Agent Error] TransportError"));
        assert_eq!(h.store.incidents()[0].status, "open");
    }

    #[tokio::test]
    async fn remediate_unknown_incident_is_not_found() {
        let h = harness();
        let (status, body) = send(
            &h.router,
            post_json("/incidents/42/remediate", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }
}

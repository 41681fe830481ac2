//! Persistence seam for apps, incidents and analyses.
//!
//! Services talk to [`IncidentStore`]; [`PgStore`] backs it with diesel-async
//! on Postgres.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::Result;
use crate::models::analysis::{Analysis, NewAnalysis};
use crate::models::app::{App, DeploymentStatus};
use crate::models::incident::{Incident, IncidentStatus, NewIncident};
use crate::schema::{analyses, apps, incidents};

pub type DbPool = Pool<AsyncPgConnection>;

/// Statuses a remediation run may start from.
const CLAIMABLE_STATUSES: [&str; 2] = ["open", "pr_created"];

#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn find_app_by_webhook_key(&self, webhook_key: &str) -> Result<Option<App>>;

    async fn get_app(&self, app_id: i64) -> Result<Option<App>>;

    async fn list_apps(&self) -> Result<Vec<App>>;

    async fn find_open_incident(
        &self,
        app_id: i64,
        source: &str,
        error_message: &str,
    ) -> Result<Option<Incident>>;

    /// Insert an incident. Returns `None` when an identical open incident
    /// already exists (lost a race with a concurrent report).
    async fn insert_incident(&self, new_incident: NewIncident) -> Result<Option<Incident>>;

    async fn get_incident(&self, incident_id: i64) -> Result<Option<Incident>>;

    /// Move an incident to `status`; `resolved` also stamps `resolved_at`.
    async fn set_incident_status(&self, incident_id: i64, status: IncidentStatus) -> Result<()>;

    /// Claim an incident for remediation: `open` or `pr_created` becomes
    /// `analyzing` in a single update. `false` when it was in any other state.
    async fn try_begin_analysis(&self, incident_id: i64) -> Result<bool>;

    async fn set_deployment_status(&self, app_id: i64, status: DeploymentStatus) -> Result<()>;

    async fn set_live_url(&self, app_id: i64, live_url: &str) -> Result<()>;

    async fn insert_analysis(&self, new_analysis: NewAnalysis) -> Result<Analysis>;
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IncidentStore for PgStore {
    async fn find_app_by_webhook_key(&self, webhook_key: &str) -> Result<Option<App>> {
        let mut conn = self.pool.get().await?;
        let result = apps::table
            .filter(apps::webhook_key.eq(webhook_key))
            .select(App::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn get_app(&self, app_id: i64) -> Result<Option<App>> {
        let mut conn = self.pool.get().await?;
        let result = apps::table
            .find(app_id)
            .select(App::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn list_apps(&self) -> Result<Vec<App>> {
        let mut conn = self.pool.get().await?;
        let results = apps::table
            .order(apps::id.asc())
            .select(App::as_select())
            .load(&mut conn)
            .await?;
        Ok(results)
    }

    async fn find_open_incident(
        &self,
        app_id: i64,
        source: &str,
        error_message: &str,
    ) -> Result<Option<Incident>> {
        let mut conn = self.pool.get().await?;
        let result = incidents::table
            .filter(incidents::app_id.eq(app_id))
            .filter(incidents::source.eq(source))
            .filter(incidents::error_message.eq(error_message))
            .filter(incidents::status.eq(IncidentStatus::Open.as_str()))
            .select(Incident::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn insert_incident(&self, new_incident: NewIncident) -> Result<Option<Incident>> {
        let mut conn = self.pool.get().await?;
        let result = diesel::insert_into(incidents::table)
            .values(&new_incident)
            .on_conflict_do_nothing()
            .returning(Incident::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn get_incident(&self, incident_id: i64) -> Result<Option<Incident>> {
        let mut conn = self.pool.get().await?;
        let result = incidents::table
            .find(incident_id)
            .select(Incident::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn set_incident_status(&self, incident_id: i64, status: IncidentStatus) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let resolved_at = (status == IncidentStatus::Resolved).then(Utc::now);
        diesel::update(incidents::table.find(incident_id))
            .set((
                incidents::status.eq(status.as_str()),
                incidents::resolved_at.eq(resolved_at),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn try_begin_analysis(&self, incident_id: i64) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let claimed = diesel::update(
            incidents::table
                .filter(incidents::id.eq(incident_id))
                .filter(incidents::status.eq_any(CLAIMABLE_STATUSES)),
        )
        .set(incidents::status.eq(IncidentStatus::Analyzing.as_str()))
        .execute(&mut conn)
        .await?;
        Ok(claimed == 1)
    }

    async fn set_deployment_status(&self, app_id: i64, status: DeploymentStatus) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(apps::table.find(app_id))
            .set(apps::deployment_status.eq(status.as_str()))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_live_url(&self, app_id: i64, live_url: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(apps::table.find(app_id))
            .set(apps::live_url.eq(live_url))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn insert_analysis(&self, new_analysis: NewAnalysis) -> Result<Analysis> {
        let mut conn = self.pool.get().await?;
        let result = diesel::insert_into(analyses::table)
            .values(&new_analysis)
            .returning(Analysis::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(result)
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory store used by service and route tests.

    use std::sync::Mutex;

    use super::*;
    use crate::error::SanosError;

    #[derive(Default)]
    struct Tables {
        apps: Vec<App>,
        incidents: Vec<Incident>,
        analyses: Vec<Analysis>,
    }

    #[derive(Default)]
    pub struct MemoryStore {
        tables: Mutex<Tables>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_app(&self, webhook_key: &str, vercel_project_id: Option<&str>) -> App {
            let mut tables = self.tables.lock().unwrap();
            let app = App {
                id: tables.apps.len() as i64 + 1,
                repo_owner: "acme".to_string(),
                repo_name: "shop".to_string(),
                webhook_key: webhook_key.to_string(),
                vercel_project_id: vercel_project_id.map(str::to_string),
                deployment_status: DeploymentStatus::Pending.as_str().to_string(),
                live_url: None,
                instrumented: true,
                created_at: Utc::now(),
            };
            tables.apps.push(app.clone());
            app
        }

        pub fn set_app_status(&self, app_id: i64, status: DeploymentStatus) {
            let mut tables = self.tables.lock().unwrap();
            if let Some(app) = tables.apps.iter_mut().find(|a| a.id == app_id) {
                app.deployment_status = status.as_str().to_string();
            }
        }

        pub fn incidents(&self) -> Vec<Incident> {
            self.tables.lock().unwrap().incidents.clone()
        }

        pub fn analyses(&self) -> Vec<Analysis> {
            self.tables.lock().unwrap().analyses.clone()
        }

        pub fn app(&self, app_id: i64) -> App {
            self.tables
                .lock()
                .unwrap()
                .apps
                .iter()
                .find(|a| a.id == app_id)
                .cloned()
                .expect("app exists")
        }
    }

    #[async_trait]
    impl IncidentStore for MemoryStore {
        async fn find_app_by_webhook_key(&self, webhook_key: &str) -> Result<Option<App>> {
            let tables = self.tables.lock().unwrap();
            Ok(tables.apps.iter().find(|a| a.webhook_key == webhook_key).cloned())
        }

        async fn get_app(&self, app_id: i64) -> Result<Option<App>> {
            let tables = self.tables.lock().unwrap();
            Ok(tables.apps.iter().find(|a| a.id == app_id).cloned())
        }

        async fn list_apps(&self) -> Result<Vec<App>> {
            Ok(self.tables.lock().unwrap().apps.clone())
        }

        async fn find_open_incident(
            &self,
            app_id: i64,
            source: &str,
            error_message: &str,
        ) -> Result<Option<Incident>> {
            let tables = self.tables.lock().unwrap();
            Ok(tables
                .incidents
                .iter()
                .find(|i| {
                    i.app_id == app_id
                        && i.source == source
                        && i.error_message == error_message
                        && i.status == IncidentStatus::Open.as_str()
                })
                .cloned())
        }

        async fn insert_incident(&self, new_incident: NewIncident) -> Result<Option<Incident>> {
            let mut tables = self.tables.lock().unwrap();
            let conflict = tables.incidents.iter().any(|i| {
                i.app_id == new_incident.app_id
                    && i.source == new_incident.source
                    && i.error_fingerprint == new_incident.error_fingerprint
                    && i.status == IncidentStatus::Open.as_str()
            });
            if conflict && new_incident.status == IncidentStatus::Open.as_str() {
                return Ok(None);
            }
            let incident = Incident {
                id: tables.incidents.len() as i64 + 1,
                app_id: new_incident.app_id,
                incident_type: new_incident.incident_type,
                source: new_incident.source,
                status: new_incident.status,
                error_message: new_incident.error_message,
                error_fingerprint: new_incident.error_fingerprint,
                stack_trace: new_incident.stack_trace,
                logs: new_incident.logs,
                created_at: Utc::now(),
                resolved_at: None,
            };
            tables.incidents.push(incident.clone());
            Ok(Some(incident))
        }

        async fn get_incident(&self, incident_id: i64) -> Result<Option<Incident>> {
            let tables = self.tables.lock().unwrap();
            Ok(tables.incidents.iter().find(|i| i.id == incident_id).cloned())
        }

        async fn set_incident_status(&self, incident_id: i64, status: IncidentStatus) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            if status == IncidentStatus::Open {
                let target = tables.incidents.iter().find(|i| i.id == incident_id).cloned();
                let conflict = target.is_some_and(|t| {
                    tables.incidents.iter().any(|i| {
                        i.id != t.id
                            && i.app_id == t.app_id
                            && i.source == t.source
                            && i.error_fingerprint == t.error_fingerprint
                            && i.status == IncidentStatus::Open.as_str()
                    })
                });
                if conflict {
                    return Err(SanosError::Database(
                        "duplicate key value violates unique constraint \"uq_incidents_open_dedup\""
                            .into(),
                    ));
                }
            }
            if let Some(incident) = tables.incidents.iter_mut().find(|i| i.id == incident_id) {
                incident.status = status.as_str().to_string();
                incident.resolved_at = (status == IncidentStatus::Resolved).then(Utc::now);
            }
            Ok(())
        }

        async fn try_begin_analysis(&self, incident_id: i64) -> Result<bool> {
            let mut tables = self.tables.lock().unwrap();
            match tables.incidents.iter_mut().find(|i| i.id == incident_id) {
                Some(incident) if CLAIMABLE_STATUSES.contains(&incident.status.as_str()) => {
                    incident.status = IncidentStatus::Analyzing.as_str().to_string();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn set_deployment_status(&self, app_id: i64, status: DeploymentStatus) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            if let Some(app) = tables.apps.iter_mut().find(|a| a.id == app_id) {
                app.deployment_status = status.as_str().to_string();
            }
            Ok(())
        }

        async fn set_live_url(&self, app_id: i64, live_url: &str) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            if let Some(app) = tables.apps.iter_mut().find(|a| a.id == app_id) {
                app.live_url = Some(live_url.to_string());
            }
            Ok(())
        }

        async fn insert_analysis(&self, new_analysis: NewAnalysis) -> Result<Analysis> {
            let mut tables = self.tables.lock().unwrap();
            let analysis = Analysis {
                id: tables.analyses.len() as i64 + 1,
                incident_id: new_analysis.incident_id,
                model: new_analysis.model,
                prompt: new_analysis.prompt,
                root_cause: new_analysis.root_cause,
                suggested_fix: new_analysis.suggested_fix,
                files_analyzed: new_analysis.files_analyzed,
                commits_analyzed: new_analysis.commits_analyzed,
                pr_url: new_analysis.pr_url,
                pr_number: new_analysis.pr_number,
                branch_name: new_analysis.branch_name,
                tokens_used: new_analysis.tokens_used,
                created_at: Utc::now(),
            };
            tables.analyses.push(analysis.clone());
            Ok(analysis)
        }
    }
}

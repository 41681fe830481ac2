//! Schema migration for the orchestrator tables.

use diesel_async::AsyncPgConnection;
use diesel_async::SimpleAsyncConnection;

/// Idempotent DDL for apps, incidents and analyses.
///
/// The partial unique index on incidents backs the "one open incident per
/// (app, source, message)" rule when two identical reports race.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS apps (
    id                  BIGSERIAL PRIMARY KEY,
    repo_owner          VARCHAR(255) NOT NULL,
    repo_name           VARCHAR(255) NOT NULL,
    webhook_key         VARCHAR(128) NOT NULL UNIQUE,
    vercel_project_id   VARCHAR(255),
    deployment_status   VARCHAR(32) NOT NULL DEFAULT 'pending',
    live_url            VARCHAR(512),
    instrumented        BOOLEAN NOT NULL DEFAULT FALSE,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_apps_repo ON apps (repo_owner, repo_name);

CREATE TABLE IF NOT EXISTS incidents (
    id                  BIGSERIAL PRIMARY KEY,
    app_id              BIGINT NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
    incident_type       VARCHAR(32) NOT NULL,
    source              VARCHAR(32) NOT NULL,
    status              VARCHAR(32) NOT NULL DEFAULT 'open',
    error_message       TEXT NOT NULL,
    error_fingerprint   VARCHAR(64) NOT NULL,
    stack_trace         TEXT,
    logs                JSONB,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    resolved_at         TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_incidents_app ON incidents (app_id);
CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents (status);
CREATE UNIQUE INDEX IF NOT EXISTS uq_incidents_open_dedup
    ON incidents (app_id, source, error_fingerprint)
    WHERE status = 'open';

CREATE TABLE IF NOT EXISTS analyses (
    id                  BIGSERIAL PRIMARY KEY,
    incident_id         BIGINT NOT NULL REFERENCES incidents(id) ON DELETE CASCADE,
    model               VARCHAR(255) NOT NULL,
    prompt              TEXT NOT NULL,
    root_cause          TEXT,
    suggested_fix       JSONB,
    files_analyzed      JSONB NOT NULL DEFAULT '[]',
    commits_analyzed    JSONB NOT NULL DEFAULT '[]',
    pr_url              VARCHAR(512),
    pr_number           INTEGER,
    branch_name         VARCHAR(255),
    tokens_used         BIGINT,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_analyses_incident ON analyses (incident_id);
"#;

pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
    Ok(())
}

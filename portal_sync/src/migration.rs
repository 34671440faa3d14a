//! Idempotent schema migration for the portal sync tables.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

/// SQL migration for the portal sync tables.
pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- Developer portal: catalog sync and resource discovery
-- ================================================================

CREATE TABLE IF NOT EXISTS portal_teams (
    id              UUID PRIMARY KEY,
    name            VARCHAR(255) NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_portal_teams_name ON portal_teams (LOWER(name));

CREATE TABLE IF NOT EXISTS portal_projects (
    id                  UUID PRIMARY KEY,
    name                VARCHAR(255) NOT NULL,
    kind                VARCHAR(32) NOT NULL DEFAULT 'service',
    description         TEXT NOT NULL DEFAULT '',
    owner_team_id       UUID NOT NULL REFERENCES portal_teams(id),
    catalog_file_path   VARCHAR(1024) UNIQUE,
    catalog_metadata    JSONB,
    links               JSONB NOT NULL DEFAULT '[]',
    last_synced_at      TIMESTAMPTZ,
    sync_status         VARCHAR(32) NOT NULL DEFAULT 'pending',
    sync_error          TEXT,
    auto_synced         BOOLEAN NOT NULL DEFAULT FALSE,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_portal_projects_owner ON portal_projects (owner_team_id);

CREATE TABLE IF NOT EXISTS portal_secrets (
    id              UUID PRIMARY KEY,
    name            VARCHAR(255) NOT NULL,
    provider        VARCHAR(32) NOT NULL DEFAULT 'aws',
    encrypted_value BYTEA NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS portal_discovered_resources (
    id              UUID PRIMARY KEY,
    project_id      UUID NOT NULL REFERENCES portal_projects(id) ON DELETE CASCADE,
    secret_id       UUID NOT NULL REFERENCES portal_secrets(id),
    arn             VARCHAR(2048) NOT NULL,
    resource_type   VARCHAR(32) NOT NULL,
    name            VARCHAR(1024) NOT NULL,
    region          VARCHAR(64) NOT NULL,
    status          VARCHAR(32) NOT NULL DEFAULT 'active',
    metadata        JSONB NOT NULL DEFAULT '{}',
    discovered_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_synced_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (project_id, arn)
);

CREATE INDEX IF NOT EXISTS idx_portal_resources_sweep
    ON portal_discovered_resources (project_id, secret_id, region, status);

CREATE TABLE IF NOT EXISTS portal_provisioning_requests (
    id              UUID PRIMARY KEY,
    project_id      UUID NOT NULL REFERENCES portal_projects(id) ON DELETE CASCADE,
    secret_id       UUID NOT NULL REFERENCES portal_secrets(id),
    resource_type   VARCHAR(32) NOT NULL,
    name            VARCHAR(1024) NOT NULL,
    region          VARCHAR(64) NOT NULL,
    attributes      JSONB NOT NULL DEFAULT '{}',
    status          VARCHAR(32) NOT NULL DEFAULT 'pending',
    arn             VARCHAR(2048),
    error           TEXT,
    requested_by    VARCHAR(255) NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at    TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS portal_audit_logs (
    id              UUID PRIMARY KEY,
    actor_email     VARCHAR(255) NOT NULL,
    action          VARCHAR(128) NOT NULL,
    resource_type   VARCHAR(64) NOT NULL,
    resource_name   VARCHAR(2048) NOT NULL,
    status          VARCHAR(32) NOT NULL,
    details         JSONB NOT NULL DEFAULT 'null',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_portal_audit_created ON portal_audit_logs (created_at DESC);
"#;

/// Run the portal migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("portal migration failed: {e}"))?;
    Ok(())
}

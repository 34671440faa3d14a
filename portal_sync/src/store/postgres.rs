//! PostgreSQL store over diesel-async with a deadpool connection pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::models::audit::{AuditEntry, AuditRecord};
use crate::models::project::{CatalogProjectUpsert, NewProject, Project, ProjectPatch, SyncStatus};
use crate::models::provisioning::{
    NewProvisioningRequest, ProvisionSpec, ProvisioningRequest, ProvisioningStatus,
};
use crate::models::resource::{DiscoveredResource, ResourceStatus, ResourceUpsert, SweepScope};
use crate::models::secret::StoredSecret;
use crate::models::team::{NewTeam, Team};
use crate::schema::{
    portal_audit_logs, portal_discovered_resources, portal_projects, portal_provisioning_requests,
    portal_secrets, portal_teams,
};
use crate::store::{
    AuditSink, ProjectStore, ProvisioningStore, ResourceStore, SecretStore, TeamStore,
};

pub type PgPool = Pool<AsyncPgConnection>;

/// Build a connection pool for `database_url`.
pub fn connect(database_url: &str, max_size: usize) -> anyhow::Result<PgPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager).max_size(max_size).build()?;
    Ok(pool)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ── Rows ──

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = portal_teams)]
struct TeamRow {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<TeamRow> for Team {
    fn from(row: TeamRow) -> Self {
        Team {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = portal_projects)]
struct ProjectRow {
    id: Uuid,
    name: String,
    kind: String,
    description: String,
    owner_team_id: Uuid,
    catalog_file_path: Option<String>,
    catalog_metadata: Option<serde_json::Value>,
    links: serde_json::Value,
    last_synced_at: Option<DateTime<Utc>>,
    sync_status: String,
    sync_error: Option<String>,
    auto_synced: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = PortalError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: row.id,
            name: row.name,
            kind: row.kind.parse().map_err(|e: PortalError| PortalError::Store(e.to_string()))?,
            description: row.description,
            owner_team_id: row.owner_team_id,
            catalog_file_path: row.catalog_file_path,
            catalog_metadata: row.catalog_metadata,
            links: serde_json::from_value(row.links)
                .map_err(|e| PortalError::Store(format!("project links: {e}")))?,
            last_synced_at: row.last_synced_at,
            sync_status: row.sync_status.parse()?,
            sync_error: row.sync_error,
            auto_synced: row.auto_synced,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = portal_projects)]
struct ProjectChangeset<'a> {
    name: Option<&'a str>,
    description: Option<&'a str>,
    owner_team_id: Option<Uuid>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = portal_discovered_resources)]
struct ResourceRow {
    id: Uuid,
    project_id: Uuid,
    secret_id: Uuid,
    arn: String,
    resource_type: String,
    name: String,
    region: String,
    status: String,
    metadata: serde_json::Value,
    discovered_at: DateTime<Utc>,
    last_synced_at: DateTime<Utc>,
}

impl TryFrom<ResourceRow> for DiscoveredResource {
    type Error = PortalError;

    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        Ok(DiscoveredResource {
            id: row.id,
            project_id: row.project_id,
            secret_id: row.secret_id,
            arn: row.arn,
            resource_type: row
                .resource_type
                .parse()
                .map_err(|e: PortalError| PortalError::Store(e.to_string()))?,
            name: row.name,
            region: row.region,
            status: row.status.parse()?,
            metadata: row.metadata,
            discovered_at: row.discovered_at,
            last_synced_at: row.last_synced_at,
        })
    }
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = portal_secrets)]
struct SecretRow {
    id: Uuid,
    name: String,
    provider: String,
    encrypted_value: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl From<SecretRow> for StoredSecret {
    fn from(row: SecretRow) -> Self {
        StoredSecret {
            id: row.id,
            name: row.name,
            provider: row.provider,
            encrypted_value: row.encrypted_value,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = portal_provisioning_requests)]
struct ProvisioningRow {
    id: Uuid,
    project_id: Uuid,
    secret_id: Uuid,
    resource_type: String,
    name: String,
    region: String,
    attributes: serde_json::Value,
    status: String,
    arn: Option<String>,
    error: Option<String>,
    requested_by: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProvisioningRow> for ProvisioningRequest {
    type Error = PortalError;

    fn try_from(row: ProvisioningRow) -> Result<Self, Self::Error> {
        Ok(ProvisioningRequest {
            id: row.id,
            project_id: row.project_id,
            secret_id: row.secret_id,
            spec: ProvisionSpec {
                resource_type: row
                    .resource_type
                    .parse()
                    .map_err(|e: PortalError| PortalError::Store(e.to_string()))?,
                name: row.name,
                region: row.region,
                attributes: serde_json::from_value(row.attributes)
                    .map_err(|e| PortalError::Store(format!("provisioning attributes: {e}")))?,
            },
            status: row.status.parse()?,
            arn: row.arn,
            error: row.error,
            requested_by: row.requested_by,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = portal_audit_logs)]
struct AuditRow {
    id: Uuid,
    actor_email: String,
    action: String,
    resource_type: String,
    resource_name: String,
    status: String,
    details: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditRecord {
    fn from(row: AuditRow) -> Self {
        AuditRecord {
            id: row.id,
            entry: AuditEntry {
                actor_email: row.actor_email,
                action: row.action,
                resource_type: row.resource_type,
                resource_name: row.resource_name,
                status: row.status,
                details: row.details,
            },
            created_at: row.created_at,
        }
    }
}

fn links_json(links: &[crate::models::declaration::CatalogLink]) -> PortalResult<serde_json::Value> {
    serde_json::to_value(links).map_err(|e| PortalError::Store(format!("project links: {e}")))
}

/// Escape LIKE metacharacters so a team name matches literally under ILIKE.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ── Projects ──

#[async_trait]
impl ProjectStore for PgStore {
    async fn find_project_by_catalog_path(&self, path: &str) -> PortalResult<Option<Project>> {
        let mut conn = self.pool.get().await?;
        let row = portal_projects::table
            .filter(portal_projects::catalog_file_path.eq(path))
            .select(ProjectRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Project::try_from).transpose()
    }

    async fn upsert_project_from_catalog(
        &self,
        upsert: CatalogProjectUpsert,
    ) -> PortalResult<Project> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let row = ProjectRow {
            id: Uuid::new_v4(),
            name: upsert.name,
            kind: upsert.kind.as_str().to_string(),
            description: upsert.description,
            owner_team_id: upsert.owner_team_id,
            catalog_file_path: Some(upsert.catalog_file_path),
            catalog_metadata: Some(upsert.catalog_metadata),
            links: links_json(&upsert.links)?,
            last_synced_at: Some(upsert.synced_at),
            sync_status: SyncStatus::Synced.as_str().to_string(),
            sync_error: None,
            auto_synced: true,
            created_at: now,
            updated_at: now,
        };

        let stored = diesel::insert_into(portal_projects::table)
            .values(&row)
            .on_conflict(portal_projects::catalog_file_path)
            .do_update()
            .set((
                portal_projects::name.eq(excluded(portal_projects::name)),
                portal_projects::kind.eq(excluded(portal_projects::kind)),
                portal_projects::description.eq(excluded(portal_projects::description)),
                portal_projects::owner_team_id.eq(excluded(portal_projects::owner_team_id)),
                portal_projects::catalog_metadata.eq(excluded(portal_projects::catalog_metadata)),
                portal_projects::links.eq(excluded(portal_projects::links)),
                portal_projects::last_synced_at.eq(excluded(portal_projects::last_synced_at)),
                portal_projects::sync_status.eq(SyncStatus::Synced.as_str()),
                portal_projects::sync_error.eq(None::<String>),
                portal_projects::auto_synced.eq(true),
                portal_projects::updated_at.eq(now),
            ))
            .returning(ProjectRow::as_returning())
            .get_result(&mut conn)
            .await?;

        Project::try_from(stored)
    }

    async fn mark_catalog_sync_failed(
        &self,
        path: &str,
        error: &str,
    ) -> PortalResult<Option<Project>> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(
            portal_projects::table.filter(portal_projects::catalog_file_path.eq(path)),
        )
        .set((
            portal_projects::sync_status.eq(SyncStatus::Failed.as_str()),
            portal_projects::sync_error.eq(error),
            portal_projects::updated_at.eq(Utc::now()),
        ))
        .returning(ProjectRow::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;
        row.map(Project::try_from).transpose()
    }

    async fn get_project(&self, id: Uuid) -> PortalResult<Option<Project>> {
        let mut conn = self.pool.get().await?;
        let row = portal_projects::table
            .find(id)
            .select(ProjectRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(Project::try_from).transpose()
    }

    async fn list_projects(&self) -> PortalResult<Vec<Project>> {
        let mut conn = self.pool.get().await?;
        let rows = portal_projects::table
            .order(portal_projects::name.asc())
            .select(ProjectRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(Project::try_from).collect()
    }

    async fn create_project(&self, new_project: NewProject) -> PortalResult<Project> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let row = ProjectRow {
            id: Uuid::new_v4(),
            name: new_project.name,
            kind: new_project.kind.as_str().to_string(),
            description: new_project.description,
            owner_team_id: new_project.owner_team_id,
            catalog_file_path: None,
            catalog_metadata: None,
            links: serde_json::json!([]),
            last_synced_at: None,
            sync_status: SyncStatus::Pending.as_str().to_string(),
            sync_error: None,
            auto_synced: false,
            created_at: now,
            updated_at: now,
        };
        let stored = diesel::insert_into(portal_projects::table)
            .values(&row)
            .returning(ProjectRow::as_returning())
            .get_result(&mut conn)
            .await?;
        Project::try_from(stored)
    }

    async fn update_project(&self, id: Uuid, patch: ProjectPatch) -> PortalResult<Project> {
        let mut conn = self.pool.get().await?;
        let changeset = ProjectChangeset {
            name: patch.name.as_deref(),
            description: patch.description.as_deref(),
            owner_team_id: patch.owner_team_id,
            updated_at: Utc::now(),
        };
        let row = diesel::update(portal_projects::table.find(id))
            .set(&changeset)
            .returning(ProjectRow::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| PortalError::not_found("project", id))?;
        Project::try_from(row)
    }
}

// ── Teams ──

#[async_trait]
impl TeamStore for PgStore {
    async fn find_team(&self, id: Uuid) -> PortalResult<Option<Team>> {
        let mut conn = self.pool.get().await?;
        let row = portal_teams::table
            .find(id)
            .select(TeamRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Team::from))
    }

    async fn find_team_by_name(&self, name: &str) -> PortalResult<Option<Team>> {
        let mut conn = self.pool.get().await?;
        let row = portal_teams::table
            .filter(portal_teams::name.ilike(escape_like(name.trim())))
            .select(TeamRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Team::from))
    }

    async fn create_team(&self, new_team: NewTeam) -> PortalResult<Team> {
        let mut conn = self.pool.get().await?;
        let row = TeamRow {
            id: Uuid::new_v4(),
            name: new_team.name,
            created_at: Utc::now(),
        };
        let stored = diesel::insert_into(portal_teams::table)
            .values(&row)
            .returning(TeamRow::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(stored.into())
    }

    async fn list_teams(&self) -> PortalResult<Vec<Team>> {
        let mut conn = self.pool.get().await?;
        let rows = portal_teams::table
            .order(portal_teams::name.asc())
            .select(TeamRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(Team::from).collect())
    }
}

// ── Discovered resources ──

#[async_trait]
impl ResourceStore for PgStore {
    async fn find_resource_by_arn(
        &self,
        project_id: Uuid,
        arn: &str,
    ) -> PortalResult<Option<DiscoveredResource>> {
        let mut conn = self.pool.get().await?;
        let row = portal_discovered_resources::table
            .filter(portal_discovered_resources::project_id.eq(project_id))
            .filter(portal_discovered_resources::arn.eq(arn))
            .select(ResourceRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(DiscoveredResource::try_from).transpose()
    }

    async fn upsert_resource(&self, upsert: ResourceUpsert) -> PortalResult<DiscoveredResource> {
        use crate::schema::portal_discovered_resources::dsl as r;

        let mut conn = self.pool.get().await?;
        let candidate = upsert.candidate;
        let row = ResourceRow {
            id: Uuid::new_v4(),
            project_id: upsert.project_id,
            secret_id: upsert.secret_id,
            arn: candidate.arn,
            resource_type: candidate.resource_type.as_str().to_string(),
            name: candidate.name,
            region: candidate.region,
            status: ResourceStatus::Active.as_str().to_string(),
            metadata: candidate.metadata,
            discovered_at: upsert.observed_at,
            last_synced_at: upsert.observed_at,
        };

        let stored = diesel::insert_into(r::portal_discovered_resources)
            .values(&row)
            .on_conflict((r::project_id, r::arn))
            .do_update()
            .set((
                r::secret_id.eq(excluded(r::secret_id)),
                r::name.eq(excluded(r::name)),
                r::region.eq(excluded(r::region)),
                r::metadata.eq(excluded(r::metadata)),
                r::status.eq(ResourceStatus::Active.as_str()),
                r::last_synced_at.eq(excluded(r::last_synced_at)),
            ))
            .returning(ResourceRow::as_returning())
            .get_result(&mut conn)
            .await?;

        DiscoveredResource::try_from(stored)
    }

    async fn mark_resources_unknown(&self, scope: &SweepScope) -> PortalResult<u64> {
        use crate::schema::portal_discovered_resources::dsl as r;

        if scope.resource_types.is_empty() {
            return Ok(0);
        }
        let types: Vec<&str> = scope.resource_types.iter().map(|t| t.as_str()).collect();
        let mut conn = self.pool.get().await?;
        let count = diesel::update(
            r::portal_discovered_resources
                .filter(r::project_id.eq(scope.project_id))
                .filter(r::secret_id.eq(scope.secret_id))
                .filter(r::region.eq(scope.region.as_str()))
                .filter(r::resource_type.eq_any(types))
                .filter(r::status.ne(ResourceStatus::Deleted.as_str())),
        )
        .set(r::status.eq(ResourceStatus::Unknown.as_str()))
        .execute(&mut conn)
        .await?;
        Ok(count as u64)
    }

    async fn mark_unknown_resources_deleted(&self, scope: &SweepScope) -> PortalResult<u64> {
        use crate::schema::portal_discovered_resources::dsl as r;

        if scope.resource_types.is_empty() {
            return Ok(0);
        }
        let types: Vec<&str> = scope.resource_types.iter().map(|t| t.as_str()).collect();
        let mut conn = self.pool.get().await?;
        let count = diesel::update(
            r::portal_discovered_resources
                .filter(r::project_id.eq(scope.project_id))
                .filter(r::secret_id.eq(scope.secret_id))
                .filter(r::region.eq(scope.region.as_str()))
                .filter(r::resource_type.eq_any(types))
                .filter(r::status.eq(ResourceStatus::Unknown.as_str())),
        )
        .set((
            r::status.eq(ResourceStatus::Deleted.as_str()),
            r::last_synced_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(count as u64)
    }

    async fn list_resources(&self, project_id: Uuid) -> PortalResult<Vec<DiscoveredResource>> {
        let mut conn = self.pool.get().await?;
        let rows = portal_discovered_resources::table
            .filter(portal_discovered_resources::project_id.eq(project_id))
            .order((
                portal_discovered_resources::resource_type.asc(),
                portal_discovered_resources::name.asc(),
            ))
            .select(ResourceRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(DiscoveredResource::try_from).collect()
    }

    async fn delete_resource(&self, project_id: Uuid, resource_id: Uuid) -> PortalResult<bool> {
        let mut conn = self.pool.get().await?;
        let deleted = diesel::delete(
            portal_discovered_resources::table
                .filter(portal_discovered_resources::id.eq(resource_id))
                .filter(portal_discovered_resources::project_id.eq(project_id)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted > 0)
    }
}

// ── Secrets ──

#[async_trait]
impl SecretStore for PgStore {
    async fn find_secret(&self, id: Uuid) -> PortalResult<Option<StoredSecret>> {
        let mut conn = self.pool.get().await?;
        let row = portal_secrets::table
            .find(id)
            .select(SecretRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(StoredSecret::from))
    }

    async fn insert_secret(&self, secret: StoredSecret) -> PortalResult<StoredSecret> {
        let mut conn = self.pool.get().await?;
        let row = SecretRow {
            id: secret.id,
            name: secret.name,
            provider: secret.provider,
            encrypted_value: secret.encrypted_value,
            created_at: secret.created_at,
        };
        let stored = diesel::insert_into(portal_secrets::table)
            .values(&row)
            .returning(SecretRow::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(stored.into())
    }
}

// ── Provisioning requests ──

#[async_trait]
impl ProvisioningStore for PgStore {
    async fn create_request(
        &self,
        request: NewProvisioningRequest,
    ) -> PortalResult<ProvisioningRequest> {
        let mut conn = self.pool.get().await?;
        let attributes = serde_json::to_value(&request.spec.attributes)
            .map_err(|e| PortalError::Store(format!("provisioning attributes: {e}")))?;
        let row = ProvisioningRow {
            id: Uuid::new_v4(),
            project_id: request.project_id,
            secret_id: request.secret_id,
            resource_type: request.spec.resource_type.as_str().to_string(),
            name: request.spec.name,
            region: request.spec.region,
            attributes,
            status: ProvisioningStatus::Pending.as_str().to_string(),
            arn: None,
            error: None,
            requested_by: request.requested_by,
            created_at: Utc::now(),
            completed_at: None,
        };
        let stored = diesel::insert_into(portal_provisioning_requests::table)
            .values(&row)
            .returning(ProvisioningRow::as_returning())
            .get_result(&mut conn)
            .await?;
        ProvisioningRequest::try_from(stored)
    }

    async fn get_request(&self, id: Uuid) -> PortalResult<Option<ProvisioningRequest>> {
        let mut conn = self.pool.get().await?;
        let row = portal_provisioning_requests::table
            .find(id)
            .select(ProvisioningRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(ProvisioningRequest::try_from).transpose()
    }

    async fn complete_request(&self, id: Uuid, arn: &str) -> PortalResult<ProvisioningRequest> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(portal_provisioning_requests::table.find(id))
            .set((
                portal_provisioning_requests::status.eq(ProvisioningStatus::Succeeded.as_str()),
                portal_provisioning_requests::arn.eq(arn),
                portal_provisioning_requests::error.eq(None::<String>),
                portal_provisioning_requests::completed_at.eq(Utc::now()),
            ))
            .returning(ProvisioningRow::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| PortalError::not_found("provisioning request", id))?;
        ProvisioningRequest::try_from(row)
    }

    async fn fail_request(&self, id: Uuid, error: &str) -> PortalResult<ProvisioningRequest> {
        let mut conn = self.pool.get().await?;
        let row = diesel::update(portal_provisioning_requests::table.find(id))
            .set((
                portal_provisioning_requests::status.eq(ProvisioningStatus::Failed.as_str()),
                portal_provisioning_requests::error.eq(error),
                portal_provisioning_requests::completed_at.eq(Utc::now()),
            ))
            .returning(ProvisioningRow::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| PortalError::not_found("provisioning request", id))?;
        ProvisioningRequest::try_from(row)
    }
}

// ── Audit ──

#[async_trait]
impl AuditSink for PgStore {
    async fn record(&self, entry: AuditEntry) -> PortalResult<()> {
        let mut conn = self.pool.get().await?;
        let row = AuditRow {
            id: Uuid::new_v4(),
            actor_email: entry.actor_email,
            action: entry.action,
            resource_type: entry.resource_type,
            resource_name: entry.resource_name,
            status: entry.status,
            details: entry.details,
            created_at: Utc::now(),
        };
        diesel::insert_into(portal_audit_logs::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_recent(&self, limit: i64) -> PortalResult<Vec<AuditRecord>> {
        let mut conn = self.pool.get().await?;
        let rows = portal_audit_logs::table
            .order(portal_audit_logs::created_at.desc())
            .limit(limit)
            .select(AuditRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(AuditRecord::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("team_fin%"), "team\\_fin\\%");
        assert_eq!(escape_like("plain"), "plain");
    }
}

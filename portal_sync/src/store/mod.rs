//! Persistence ports consumed by the reconcilers.
//!
//! Reconciliation logic depends only on these traits. `PgStore` backs them
//! with PostgreSQL through diesel-async; `MemoryStore` keeps everything in
//! process for tests and `--in-memory` runs. Every method is individually
//! atomic: a single row, or a single statement.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PortalResult;
use crate::models::audit::{AuditEntry, AuditRecord};
use crate::models::project::{CatalogProjectUpsert, NewProject, Project, ProjectPatch};
use crate::models::provisioning::{NewProvisioningRequest, ProvisioningRequest};
use crate::models::resource::{DiscoveredResource, ResourceUpsert, SweepScope};
use crate::models::secret::StoredSecret;
use crate::models::team::{NewTeam, Team};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn find_project_by_catalog_path(&self, path: &str) -> PortalResult<Option<Project>>;

    /// Insert or update the project owning `catalog_file_path`. The id and
    /// `created_at` of an existing row are preserved.
    async fn upsert_project_from_catalog(&self, upsert: CatalogProjectUpsert)
        -> PortalResult<Project>;

    /// Record a failed sync on the project linked to `path`, leaving its
    /// other fields alone. Returns `None` when no project is linked.
    async fn mark_catalog_sync_failed(
        &self,
        path: &str,
        error: &str,
    ) -> PortalResult<Option<Project>>;

    async fn get_project(&self, id: Uuid) -> PortalResult<Option<Project>>;

    async fn list_projects(&self) -> PortalResult<Vec<Project>>;

    async fn create_project(&self, new_project: NewProject) -> PortalResult<Project>;

    async fn update_project(&self, id: Uuid, patch: ProjectPatch) -> PortalResult<Project>;
}

#[async_trait]
pub trait TeamStore: Send + Sync {
    async fn find_team(&self, id: Uuid) -> PortalResult<Option<Team>>;

    /// Case-insensitive lookup on the team name.
    async fn find_team_by_name(&self, name: &str) -> PortalResult<Option<Team>>;

    async fn create_team(&self, new_team: NewTeam) -> PortalResult<Team>;

    async fn list_teams(&self) -> PortalResult<Vec<Team>>;
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find_resource_by_arn(
        &self,
        project_id: Uuid,
        arn: &str,
    ) -> PortalResult<Option<DiscoveredResource>>;

    /// Insert or update by (project_id, arn); the result is always `active`.
    async fn upsert_resource(&self, upsert: ResourceUpsert) -> PortalResult<DiscoveredResource>;

    /// Move every non-deleted resource in scope to `unknown`.
    async fn mark_resources_unknown(&self, scope: &SweepScope) -> PortalResult<u64>;

    /// Move every `unknown` resource in scope to `deleted`.
    async fn mark_unknown_resources_deleted(&self, scope: &SweepScope) -> PortalResult<u64>;

    async fn list_resources(&self, project_id: Uuid) -> PortalResult<Vec<DiscoveredResource>>;

    /// Hard delete. Only reachable through an explicit user action.
    async fn delete_resource(&self, project_id: Uuid, resource_id: Uuid) -> PortalResult<bool>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn find_secret(&self, id: Uuid) -> PortalResult<Option<StoredSecret>>;

    async fn insert_secret(&self, secret: StoredSecret) -> PortalResult<StoredSecret>;
}

#[async_trait]
pub trait ProvisioningStore: Send + Sync {
    async fn create_request(&self, request: NewProvisioningRequest)
        -> PortalResult<ProvisioningRequest>;

    async fn get_request(&self, id: Uuid) -> PortalResult<Option<ProvisioningRequest>>;

    async fn complete_request(&self, id: Uuid, arn: &str) -> PortalResult<ProvisioningRequest>;

    async fn fail_request(&self, id: Uuid, error: &str) -> PortalResult<ProvisioningRequest>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> PortalResult<()>;

    async fn list_recent(&self, limit: i64) -> PortalResult<Vec<AuditRecord>>;
}

/// Every persistence port, bundled for wiring.
#[derive(Clone)]
pub struct Stores {
    pub projects: Arc<dyn ProjectStore>,
    pub teams: Arc<dyn TeamStore>,
    pub resources: Arc<dyn ResourceStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub provisioning: Arc<dyn ProvisioningStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ProjectStore
            + TeamStore
            + ResourceStore
            + SecretStore
            + ProvisioningStore
            + AuditSink
            + 'static,
    {
        Self {
            projects: backend.clone(),
            teams: backend.clone(),
            resources: backend.clone(),
            secrets: backend.clone(),
            provisioning: backend.clone(),
            audit: backend,
        }
    }

    pub fn postgres(store: PgStore) -> Self {
        Self::from_backend(Arc::new(store))
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self::from_backend(store)
    }
}

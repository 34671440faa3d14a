//! In-process store. Same contract as `PgStore`, nothing survives a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::models::audit::{AuditEntry, AuditRecord};
use crate::models::project::{CatalogProjectUpsert, NewProject, Project, ProjectPatch, SyncStatus};
use crate::models::provisioning::{
    NewProvisioningRequest, ProvisioningRequest, ProvisioningStatus,
};
use crate::models::resource::{DiscoveredResource, ResourceStatus, ResourceUpsert, SweepScope};
use crate::models::secret::StoredSecret;
use crate::models::team::{NewTeam, Team};
use crate::store::{
    AuditSink, ProjectStore, ProvisioningStore, ResourceStore, SecretStore, TeamStore,
};

#[derive(Default)]
struct MemoryState {
    projects: Vec<Project>,
    teams: Vec<Team>,
    resources: Vec<DiscoveredResource>,
    secrets: HashMap<Uuid, StoredSecret>,
    provisioning: HashMap<Uuid, ProvisioningRequest>,
    audit: Vec<AuditRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    audit_unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent audit write fail, to exercise best-effort auditing.
    pub fn set_audit_unavailable(&self, unavailable: bool) {
        self.audit_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        let state = self.state.lock().await;
        state.audit.iter().map(|r| r.entry.clone()).collect()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn find_project_by_catalog_path(&self, path: &str) -> PortalResult<Option<Project>> {
        let state = self.state.lock().await;
        Ok(state
            .projects
            .iter()
            .find(|p| p.catalog_file_path.as_deref() == Some(path))
            .cloned())
    }

    async fn upsert_project_from_catalog(
        &self,
        upsert: CatalogProjectUpsert,
    ) -> PortalResult<Project> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if let Some(project) = state
            .projects
            .iter_mut()
            .find(|p| p.catalog_file_path.as_deref() == Some(upsert.catalog_file_path.as_str()))
        {
            project.name = upsert.name;
            project.kind = upsert.kind;
            project.description = upsert.description;
            project.owner_team_id = upsert.owner_team_id;
            project.catalog_metadata = Some(upsert.catalog_metadata);
            project.links = upsert.links;
            project.last_synced_at = Some(upsert.synced_at);
            project.sync_status = SyncStatus::Synced;
            project.sync_error = None;
            project.auto_synced = true;
            project.updated_at = now;
            return Ok(project.clone());
        }

        let project = Project {
            id: Uuid::new_v4(),
            name: upsert.name,
            kind: upsert.kind,
            description: upsert.description,
            owner_team_id: upsert.owner_team_id,
            catalog_file_path: Some(upsert.catalog_file_path),
            catalog_metadata: Some(upsert.catalog_metadata),
            links: upsert.links,
            last_synced_at: Some(upsert.synced_at),
            sync_status: SyncStatus::Synced,
            sync_error: None,
            auto_synced: true,
            created_at: now,
            updated_at: now,
        };
        state.projects.push(project.clone());
        Ok(project)
    }

    async fn mark_catalog_sync_failed(
        &self,
        path: &str,
        error: &str,
    ) -> PortalResult<Option<Project>> {
        let mut state = self.state.lock().await;
        Ok(state
            .projects
            .iter_mut()
            .find(|p| p.catalog_file_path.as_deref() == Some(path))
            .map(|project| {
                project.sync_status = SyncStatus::Failed;
                project.sync_error = Some(error.to_string());
                project.updated_at = Utc::now();
                project.clone()
            }))
    }

    async fn get_project(&self, id: Uuid) -> PortalResult<Option<Project>> {
        let state = self.state.lock().await;
        Ok(state.projects.iter().find(|p| p.id == id).cloned())
    }

    async fn list_projects(&self) -> PortalResult<Vec<Project>> {
        let state = self.state.lock().await;
        let mut projects = state.projects.clone();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn create_project(&self, new_project: NewProject) -> PortalResult<Project> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name: new_project.name,
            kind: new_project.kind,
            description: new_project.description,
            owner_team_id: new_project.owner_team_id,
            catalog_file_path: None,
            catalog_metadata: None,
            links: Vec::new(),
            last_synced_at: None,
            sync_status: SyncStatus::Pending,
            sync_error: None,
            auto_synced: false,
            created_at: now,
            updated_at: now,
        };
        state.projects.push(project.clone());
        Ok(project)
    }

    async fn update_project(&self, id: Uuid, patch: ProjectPatch) -> PortalResult<Project> {
        let mut state = self.state.lock().await;
        let project = state
            .projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PortalError::not_found("project", id))?;
        patch.apply(project);
        project.updated_at = Utc::now();
        Ok(project.clone())
    }
}

#[async_trait]
impl TeamStore for MemoryStore {
    async fn find_team(&self, id: Uuid) -> PortalResult<Option<Team>> {
        let state = self.state.lock().await;
        Ok(state.teams.iter().find(|t| t.id == id).cloned())
    }

    async fn find_team_by_name(&self, name: &str) -> PortalResult<Option<Team>> {
        let state = self.state.lock().await;
        Ok(state
            .teams
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
            .cloned())
    }

    async fn create_team(&self, new_team: NewTeam) -> PortalResult<Team> {
        let mut state = self.state.lock().await;
        if state
            .teams
            .iter()
            .any(|t| t.name.eq_ignore_ascii_case(&new_team.name))
        {
            return Err(PortalError::Conflict(format!("team '{}'", new_team.name)));
        }
        let team = Team {
            id: Uuid::new_v4(),
            name: new_team.name,
            created_at: Utc::now(),
        };
        state.teams.push(team.clone());
        Ok(team)
    }

    async fn list_teams(&self) -> PortalResult<Vec<Team>> {
        let state = self.state.lock().await;
        Ok(state.teams.clone())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn find_resource_by_arn(
        &self,
        project_id: Uuid,
        arn: &str,
    ) -> PortalResult<Option<DiscoveredResource>> {
        let state = self.state.lock().await;
        Ok(state
            .resources
            .iter()
            .find(|r| r.project_id == project_id && r.arn == arn)
            .cloned())
    }

    async fn upsert_resource(&self, upsert: ResourceUpsert) -> PortalResult<DiscoveredResource> {
        let mut state = self.state.lock().await;
        let candidate = upsert.candidate;
        if let Some(resource) = state
            .resources
            .iter_mut()
            .find(|r| r.project_id == upsert.project_id && r.arn == candidate.arn)
        {
            resource.secret_id = upsert.secret_id;
            resource.name = candidate.name;
            resource.region = candidate.region;
            resource.metadata = candidate.metadata;
            resource.status = ResourceStatus::Active;
            resource.last_synced_at = upsert.observed_at;
            return Ok(resource.clone());
        }

        let resource = DiscoveredResource {
            id: Uuid::new_v4(),
            project_id: upsert.project_id,
            secret_id: upsert.secret_id,
            arn: candidate.arn,
            resource_type: candidate.resource_type,
            name: candidate.name,
            region: candidate.region,
            status: ResourceStatus::Active,
            metadata: candidate.metadata,
            discovered_at: upsert.observed_at,
            last_synced_at: upsert.observed_at,
        };
        state.resources.push(resource.clone());
        Ok(resource)
    }

    async fn mark_resources_unknown(&self, scope: &SweepScope) -> PortalResult<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for resource in state.resources.iter_mut() {
            if scope.contains(resource) && resource.status != ResourceStatus::Deleted {
                resource.status = ResourceStatus::Unknown;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn mark_unknown_resources_deleted(&self, scope: &SweepScope) -> PortalResult<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut count = 0;
        for resource in state.resources.iter_mut() {
            if scope.contains(resource) && resource.status == ResourceStatus::Unknown {
                resource.status = ResourceStatus::Deleted;
                resource.last_synced_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_resources(&self, project_id: Uuid) -> PortalResult<Vec<DiscoveredResource>> {
        let state = self.state.lock().await;
        Ok(state
            .resources
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn delete_resource(&self, project_id: Uuid, resource_id: Uuid) -> PortalResult<bool> {
        let mut state = self.state.lock().await;
        let before = state.resources.len();
        state
            .resources
            .retain(|r| !(r.project_id == project_id && r.id == resource_id));
        Ok(state.resources.len() != before)
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn find_secret(&self, id: Uuid) -> PortalResult<Option<StoredSecret>> {
        let state = self.state.lock().await;
        Ok(state.secrets.get(&id).cloned())
    }

    async fn insert_secret(&self, secret: StoredSecret) -> PortalResult<StoredSecret> {
        let mut state = self.state.lock().await;
        if state.secrets.contains_key(&secret.id) {
            return Err(PortalError::Conflict(format!("secret {}", secret.id)));
        }
        state.secrets.insert(secret.id, secret.clone());
        Ok(secret)
    }
}

#[async_trait]
impl ProvisioningStore for MemoryStore {
    async fn create_request(
        &self,
        request: NewProvisioningRequest,
    ) -> PortalResult<ProvisioningRequest> {
        let mut state = self.state.lock().await;
        let record = ProvisioningRequest {
            id: Uuid::new_v4(),
            project_id: request.project_id,
            secret_id: request.secret_id,
            spec: request.spec,
            status: ProvisioningStatus::Pending,
            arn: None,
            error: None,
            requested_by: request.requested_by,
            created_at: Utc::now(),
            completed_at: None,
        };
        state.provisioning.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_request(&self, id: Uuid) -> PortalResult<Option<ProvisioningRequest>> {
        let state = self.state.lock().await;
        Ok(state.provisioning.get(&id).cloned())
    }

    async fn complete_request(&self, id: Uuid, arn: &str) -> PortalResult<ProvisioningRequest> {
        let mut state = self.state.lock().await;
        let record = state
            .provisioning
            .get_mut(&id)
            .ok_or_else(|| PortalError::not_found("provisioning request", id))?;
        record.status = ProvisioningStatus::Succeeded;
        record.arn = Some(arn.to_string());
        record.error = None;
        record.completed_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn fail_request(&self, id: Uuid, error: &str) -> PortalResult<ProvisioningRequest> {
        let mut state = self.state.lock().await;
        let record = state
            .provisioning
            .get_mut(&id)
            .ok_or_else(|| PortalError::not_found("provisioning request", id))?;
        record.status = ProvisioningStatus::Failed;
        record.error = Some(error.to_string());
        record.completed_at = Some(Utc::now());
        Ok(record.clone())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn record(&self, entry: AuditEntry) -> PortalResult<()> {
        if self.audit_unavailable.load(Ordering::SeqCst) {
            return Err(PortalError::Store("audit log unavailable".into()));
        }
        let mut state = self.state.lock().await;
        state.audit.push(AuditRecord {
            id: Uuid::new_v4(),
            entry,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_recent(&self, limit: i64) -> PortalResult<Vec<AuditRecord>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state.audit.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resource::{ResourceCandidate, ResourceType};

    fn upsert(project_id: Uuid, secret_id: Uuid, arn: &str) -> ResourceUpsert {
        ResourceUpsert {
            project_id,
            secret_id,
            candidate: ResourceCandidate {
                arn: arn.to_string(),
                resource_type: ResourceType::Sqs,
                name: arn.rsplit(':').next().unwrap_or_default().to_string(),
                region: "eu-west-1".into(),
                metadata: serde_json::json!({}),
            },
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn resource_upsert_is_keyed_by_project_and_arn() {
        let store = MemoryStore::new();
        let (p1, p2, secret) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let arn = "arn:aws:sqs:eu-west-1:123456789012:jobs";

        let first = store.upsert_resource(upsert(p1, secret, arn)).await.unwrap();
        let again = store.upsert_resource(upsert(p1, secret, arn)).await.unwrap();
        let other = store.upsert_resource(upsert(p2, secret, arn)).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, other.id);
        assert_eq!(store.list_resources(p1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sweep_marks_respect_scope() {
        let store = MemoryStore::new();
        let (project, secret) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .upsert_resource(upsert(project, secret, "arn:aws:sqs:eu-west-1:1:a"))
            .await
            .unwrap();

        let wrong_region = SweepScope {
            project_id: project,
            secret_id: secret,
            region: "us-east-1".into(),
            resource_types: vec![ResourceType::Sqs],
        };
        assert_eq!(store.mark_resources_unknown(&wrong_region).await.unwrap(), 0);

        let scope = SweepScope {
            region: "eu-west-1".into(),
            ..wrong_region
        };
        assert_eq!(store.mark_resources_unknown(&scope).await.unwrap(), 1);
        assert_eq!(store.mark_unknown_resources_deleted(&scope).await.unwrap(), 1);
        // Deleted rows are not pulled back to unknown by the next sweep.
        assert_eq!(store.mark_resources_unknown(&scope).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn team_lookup_ignores_case() {
        let store = MemoryStore::new();
        let team = store
            .create_team(NewTeam {
                name: "Team-Fintech".into(),
            })
            .await
            .unwrap();
        let found = store.find_team_by_name("team-fintech").await.unwrap();
        assert_eq!(found.map(|t| t.id), Some(team.id));
        assert!(matches!(
            store
                .create_team(NewTeam {
                    name: "TEAM-FINTECH".into()
                })
                .await,
            Err(PortalError::Conflict(_))
        ));
    }
}

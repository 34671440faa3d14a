//! Resource reconciler — discovery sweeps, manual association and
//! registration of provisioned resources.
//!
//! A sweep runs in three write passes over its scope: mark `unknown`, upsert
//! everything observed back to `active`, then retire what is still
//! `unknown` as `deleted`. Rediscovering a retired ARN reactivates the same
//! row. Callers serialize sweeps per (project, credential) with
//! [`crate::services::sweep_lock::SweepLocks`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::models::audit::AuditEntry;
use crate::models::project::Project;
use crate::models::provisioning::{ProvisionSpec, ProvisionedResource};
use crate::models::resource::{
    DiscoveredResource, ResourceCandidate, ResourceStatus, ResourceType, ResourceUpsert,
    SweepScope,
};
use crate::models::sync_result::{SyncOutcome, SyncResult};
use crate::services::audit_service::record_best_effort;
use crate::services::discovery::{requested_types, CloudInventory};
use crate::services::vault::CredentialVault;
use crate::store::{AuditSink, ProjectStore, ResourceStore, SecretStore, Stores};

#[derive(Debug, Clone)]
pub struct SweepRequest {
    pub project_id: Uuid,
    pub secret_id: Uuid,
    pub region: String,
    /// Empty means every discoverable type.
    pub resource_types: Vec<ResourceType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub results: Vec<SyncResult>,
    pub marked_deleted: u64,
    pub type_errors: BTreeMap<ResourceType, String>,
}

pub struct ResourceSyncService {
    projects: Arc<dyn ProjectStore>,
    resources: Arc<dyn ResourceStore>,
    secrets: Arc<dyn SecretStore>,
    audit: Arc<dyn AuditSink>,
    vault: Arc<dyn CredentialVault>,
    inventory: Arc<dyn CloudInventory>,
}

impl ResourceSyncService {
    pub fn new(
        stores: &Stores,
        vault: Arc<dyn CredentialVault>,
        inventory: Arc<dyn CloudInventory>,
    ) -> Self {
        Self {
            projects: stores.projects.clone(),
            resources: stores.resources.clone(),
            secrets: stores.secrets.clone(),
            audit: stores.audit.clone(),
            vault,
            inventory,
        }
    }

    async fn require_project(&self, project_id: Uuid) -> PortalResult<Project> {
        self.projects
            .get_project(project_id)
            .await?
            .ok_or_else(|| PortalError::not_found("project", project_id))
    }

    pub async fn sweep(&self, request: SweepRequest, actor: &str) -> PortalResult<SweepReport> {
        let project = self.require_project(request.project_id).await?;
        let region = request.region.trim().to_string();
        if region.is_empty() {
            return Err(PortalError::Validation("region is required".into()));
        }

        let credential = self.vault.get_decrypted_credential(request.secret_id).await?;
        let types = requested_types(&request.resource_types);
        let outcome = self
            .inventory
            .list_resources(&credential, &region, &types)
            .await?;

        for resource_type in outcome.type_errors.keys() {
            crate::metrics::discovery_type_failed(resource_type.as_str());
        }

        // Types whose listing failed keep their current statuses.
        let scope = SweepScope {
            project_id: project.id,
            secret_id: request.secret_id,
            region: region.clone(),
            resource_types: outcome.observed_types(&types),
        };

        if !scope.resource_types.is_empty() {
            let marked = self.resources.mark_resources_unknown(&scope).await?;
            tracing::debug!(project_id = %project.id, marked, "Marked resources unknown");
        }

        let observed_at = Utc::now();
        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::with_capacity(outcome.candidates.len());
        for candidate in outcome.candidates {
            if !scope.resource_types.contains(&candidate.resource_type)
                || !seen.insert(candidate.arn.clone())
            {
                continue;
            }
            results.push(
                self.upsert_candidate(project.id, request.secret_id, candidate, observed_at)
                    .await,
            );
        }

        let marked_deleted = if scope.resource_types.is_empty() {
            0
        } else {
            self.resources.mark_unknown_resources_deleted(&scope).await?
        };
        crate::metrics::resources_marked_deleted(marked_deleted);

        tracing::info!(
            project_id = %project.id,
            secret_id = %request.secret_id,
            region = %region,
            observed = results.len(),
            marked_deleted,
            failed_types = outcome.type_errors.len(),
            "Discovery sweep finished"
        );

        let status = if outcome.type_errors.is_empty() {
            "success"
        } else {
            "partial"
        };
        let entry = AuditEntry::new(actor, "resource.discovery", "project", &project.name)
            .status(status)
            .details(json!({
                "secret_id": request.secret_id,
                "region": region,
                "observed": results.len(),
                "marked_deleted": marked_deleted,
                "type_errors": outcome.type_errors,
            }));
        record_best_effort(self.audit.as_ref(), entry).await;

        Ok(SweepReport {
            results,
            marked_deleted,
            type_errors: outcome.type_errors,
        })
    }

    async fn upsert_candidate(
        &self,
        project_id: Uuid,
        secret_id: Uuid,
        candidate: ResourceCandidate,
        observed_at: chrono::DateTime<Utc>,
    ) -> SyncResult {
        let arn = candidate.arn.clone();
        let existed = match self.resources.find_resource_by_arn(project_id, &arn).await {
            Ok(found) => found.is_some(),
            Err(e) => return SyncResult::new(&arn, SyncOutcome::Failed, e.to_string()),
        };
        let upsert = ResourceUpsert {
            project_id,
            secret_id,
            candidate,
            observed_at,
        };
        match self.resources.upsert_resource(upsert).await {
            Ok(resource) if existed => {
                SyncResult::new(&resource.arn, SyncOutcome::Updated, "resource updated")
            }
            Ok(resource) => SyncResult::new(&resource.arn, SyncOutcome::Created, "resource created"),
            Err(e) => {
                tracing::warn!(arn = %arn, "Resource upsert failed: {e}");
                SyncResult::new(&arn, SyncOutcome::Failed, e.to_string())
            }
        }
    }

    /// Attach resources by hand. No sweep semantics: nothing is retired.
    pub async fn associate(
        &self,
        project_id: Uuid,
        secret_id: Uuid,
        candidates: Vec<ResourceCandidate>,
        actor: &str,
    ) -> PortalResult<Vec<SyncResult>> {
        let project = self.require_project(project_id).await?;
        if self.secrets.find_secret(secret_id).await?.is_none() {
            return Err(PortalError::CredentialNotFound(secret_id.to_string()));
        }

        let observed_at = Utc::now();
        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            candidate.arn = candidate.arn.trim().to_string();
            candidate.name = candidate.name.trim().to_string();
            let arn = candidate.arn.clone();

            let result = if arn.is_empty() {
                SyncResult::new("", SyncOutcome::Failed, "arn is required")
            } else if candidate.name.is_empty() {
                SyncResult::new(&arn, SyncOutcome::Failed, "name is required")
            } else if !seen.insert(arn.clone()) {
                SyncResult::new(&arn, SyncOutcome::Skipped, "already exists in this request")
            } else {
                match self.resources.find_resource_by_arn(project.id, &arn).await {
                    Ok(Some(existing)) if existing.status == ResourceStatus::Active => {
                        SyncResult::new(&arn, SyncOutcome::Skipped, "already exists")
                    }
                    Ok(_) => {
                        self.upsert_candidate(project.id, secret_id, candidate, observed_at)
                            .await
                    }
                    Err(e) => SyncResult::new(&arn, SyncOutcome::Failed, e.to_string()),
                }
            };
            results.push(result);
        }

        let entry = AuditEntry::new(actor, "resource.associate", "project", &project.name)
            .details(json!({
                "secret_id": secret_id,
                "results": results,
            }));
        record_best_effort(self.audit.as_ref(), entry).await;
        Ok(results)
    }

    /// Record a resource the provisioner just created, as `active`.
    pub async fn register_provisioned(
        &self,
        project_id: Uuid,
        secret_id: Uuid,
        spec: &ProvisionSpec,
        provisioned: &ProvisionedResource,
    ) -> PortalResult<DiscoveredResource> {
        self.resources
            .upsert_resource(ResourceUpsert {
                project_id,
                secret_id,
                candidate: ResourceCandidate {
                    arn: provisioned.arn.clone(),
                    resource_type: spec.resource_type,
                    name: spec.name.clone(),
                    region: provisioned.region.clone(),
                    metadata: json!({
                        "provisioned": true,
                        "attributes": spec.attributes,
                    }),
                },
                observed_at: Utc::now(),
            })
            .await
    }
}

//! Catalog reconciler — converges projects onto their declaration files.
//!
//! One file maps to at most one project, keyed by `catalog_file_path`.
//! Every call produces exactly one [`SyncResult`] and one audit entry.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::models::audit::AuditEntry;
use crate::models::declaration::CatalogDeclaration;
use crate::models::project::{CatalogProjectUpsert, Project};
use crate::models::sync_result::{SyncOutcome, SyncResult};
use crate::services::audit_service::record_best_effort;
use crate::services::catalog_reader::CatalogSource;
use crate::store::{AuditSink, ProjectStore, Stores, TeamStore};

pub const TEAM_REQUIRED: &str = "team_id is required";
pub const UNKNOWN_TEAM: &str = "unknown team_id";

/// One entry of a bulk sync request. `team_id` stays a string so that a
/// malformed value fails only its own item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncMapping {
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub team_id: String,
}

pub struct CatalogSyncService {
    source: Arc<dyn CatalogSource>,
    projects: Arc<dyn ProjectStore>,
    teams: Arc<dyn TeamStore>,
    audit: Arc<dyn AuditSink>,
    fallback_team_id: Option<Uuid>,
}

impl CatalogSyncService {
    pub fn new(source: Arc<dyn CatalogSource>, stores: &Stores) -> Self {
        Self {
            source,
            projects: stores.projects.clone(),
            teams: stores.teams.clone(),
            audit: stores.audit.clone(),
            fallback_team_id: None,
        }
    }

    /// Owner for new projects whose file names no known team and whose
    /// caller passes none. Webhook-triggered syncs rely on this.
    pub fn with_fallback_team(mut self, team_id: Option<Uuid>) -> Self {
        self.fallback_team_id = team_id;
        self
    }

    pub async fn list_files(&self) -> PortalResult<Vec<String>> {
        self.source.list_candidate_files().await
    }

    /// Sync one file. `team_id`, when given, wins over every other owner source.
    pub async fn sync_file(&self, path: &str, team_id: Option<Uuid>, actor: &str) -> SyncResult {
        let result = self.reconcile(path, team_id).await;
        self.finish(result, actor).await
    }

    /// Sync a batch in input order. A failing item never stops the rest.
    pub async fn sync_batch(&self, mappings: Vec<SyncMapping>, actor: &str) -> Vec<SyncResult> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::with_capacity(mappings.len());

        for mapping in mappings {
            let path = mapping.file_path.trim().to_string();
            let team = mapping.team_id.trim();

            let result = if path.is_empty() {
                self.finish(
                    SyncResult::new("", SyncOutcome::Failed, "file_path is required"),
                    actor,
                )
                .await
            } else if team.is_empty() {
                self.finish(SyncResult::new(&path, SyncOutcome::Failed, TEAM_REQUIRED), actor)
                    .await
            } else if !seen.insert(path.clone()) {
                self.finish(
                    SyncResult::new(&path, SyncOutcome::Skipped, "already exists in this batch"),
                    actor,
                )
                .await
            } else {
                match team.parse::<Uuid>() {
                    Ok(team_id) => self.sync_file(&path, Some(team_id), actor).await,
                    Err(_) => {
                        self.finish(
                            SyncResult::new(&path, SyncOutcome::Failed, "invalid team_id"),
                            actor,
                        )
                        .await
                    }
                }
            };
            results.push(result);
        }

        tracing::info!(
            total = results.len(),
            failed = results.iter().filter(|r| r.status == SyncOutcome::Failed).count(),
            "Catalog batch sync finished"
        );
        results
    }

    async fn finish(&self, result: SyncResult, actor: &str) -> SyncResult {
        crate::metrics::catalog_sync_result(result.status.as_str());
        let entry = AuditEntry::new(actor, "catalog.sync", "project", &result.source)
            .status(result.status.as_str())
            .details(json!({
                "message": result.message,
                "project_name": result.project_name,
            }));
        record_best_effort(self.audit.as_ref(), entry).await;
        result
    }

    async fn reconcile(&self, path: &str, team_id: Option<Uuid>) -> SyncResult {
        let declaration = match self.source.fetch_and_parse(path).await {
            Ok(d) => d,
            Err(e @ PortalError::NotFound { .. }) => {
                tracing::info!(path, "Catalog file not found, skipping");
                return SyncResult::new(path, SyncOutcome::Skipped, e.to_string());
            }
            Err(e @ PortalError::Parse(_)) => {
                let message = e.to_string();
                tracing::warn!(path, "Catalog file failed to parse: {message}");
                match self.projects.mark_catalog_sync_failed(path, &message).await {
                    Ok(Some(project)) => {
                        return SyncResult::new(path, SyncOutcome::Failed, message)
                            .with_project(&project.name);
                    }
                    Ok(None) => {}
                    Err(store_err) => {
                        tracing::warn!(path, "Could not record sync failure: {store_err}");
                    }
                }
                return SyncResult::new(path, SyncOutcome::Failed, message);
            }
            Err(e) => {
                tracing::warn!(path, "Catalog fetch failed: {e}");
                return SyncResult::new(path, SyncOutcome::Failed, e.to_string());
            }
        };

        match self.converge(path, declaration, team_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(path, "Catalog sync failed: {e}");
                SyncResult::new(path, SyncOutcome::Failed, e.to_string())
            }
        }
    }

    async fn converge(
        &self,
        path: &str,
        declaration: CatalogDeclaration,
        team_id: Option<Uuid>,
    ) -> PortalResult<SyncResult> {
        let existing = self.projects.find_project_by_catalog_path(path).await?;

        let owner_team_id = match self
            .resolve_owner(&declaration, team_id, existing.as_ref())
            .await?
        {
            OwnerResolution::Team(id) => id,
            OwnerResolution::UnknownTeam(id) => {
                return Ok(SyncResult::new(
                    path,
                    SyncOutcome::Failed,
                    format!("{UNKNOWN_TEAM}: {id}"),
                )
                .with_project(&declaration.name));
            }
            OwnerResolution::Unresolved => {
                let message = match &declaration.owner_team {
                    Some(owner) => {
                        format!("{TEAM_REQUIRED}: owner '{owner}' does not match any team")
                    }
                    None => TEAM_REQUIRED.to_string(),
                };
                return Ok(SyncResult::new(path, SyncOutcome::Failed, message)
                    .with_project(&declaration.name));
            }
        };

        let project = self
            .projects
            .upsert_project_from_catalog(CatalogProjectUpsert {
                catalog_file_path: path.to_string(),
                name: declaration.name,
                kind: declaration.kind,
                description: declaration.description,
                owner_team_id,
                catalog_metadata: declaration.raw_metadata,
                links: declaration.links,
                synced_at: Utc::now(),
            })
            .await?;

        let (outcome, verb) = if existing.is_some() {
            (SyncOutcome::Updated, "updated")
        } else {
            (SyncOutcome::Created, "created")
        };
        tracing::info!(path, project_id = %project.id, name = %project.name, "Project {verb} from catalog");
        Ok(SyncResult::new(path, outcome, format!("project {verb}")).with_project(&project.name))
    }

    /// Explicit team, then the current owner, then the declared owner,
    /// then the configured fallback. A project that already has an owner
    /// keeps it unless the caller names another team.
    async fn resolve_owner(
        &self,
        declaration: &CatalogDeclaration,
        explicit: Option<Uuid>,
        existing: Option<&Project>,
    ) -> PortalResult<OwnerResolution> {
        if let Some(id) = explicit {
            return self.known_team(id).await;
        }
        if let Some(project) = existing {
            return Ok(OwnerResolution::Team(project.owner_team_id));
        }
        if let Some(owner) = &declaration.owner_team {
            if let Some(team) = self.teams.find_team_by_name(owner).await? {
                return Ok(OwnerResolution::Team(team.id));
            }
            tracing::debug!(owner = %owner, "Declared owner does not match a team");
        }
        match self.fallback_team_id {
            Some(id) => self.known_team(id).await,
            None => Ok(OwnerResolution::Unresolved),
        }
    }

    async fn known_team(&self, id: Uuid) -> PortalResult<OwnerResolution> {
        Ok(match self.teams.find_team(id).await? {
            Some(team) => OwnerResolution::Team(team.id),
            None => {
                tracing::warn!(team_id = %id, "Catalog sync names a team that does not exist");
                OwnerResolution::UnknownTeam(id)
            }
        })
    }
}

enum OwnerResolution {
    Team(Uuid),
    UnknownTeam(Uuid),
    Unresolved,
}

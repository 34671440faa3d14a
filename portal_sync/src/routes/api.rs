//! REST API for catalog sync, projects, resources and credentials.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::PortalError;
use crate::models::audit::{AuditEntry, AuditRecord};
use crate::models::project::{NewProject, Project, ProjectPatch};
use crate::models::provisioning::{ProvisionSpec, ProvisioningRequest};
use crate::models::resource::{DiscoveredResource, ResourceCandidate, ResourceType};
use crate::models::secret::{CloudCredential, StoredSecret};
use crate::models::sync_result::SyncResult;
use crate::models::team::{NewTeam, Team};
use crate::routes::{actor, ApiError, PortalState};
use crate::services::audit_service::record_best_effort;
use crate::services::catalog_sync::SyncMapping;
use crate::services::resource_sync::{SweepReport, SweepRequest};

type ApiResult<T> = Result<T, ApiError>;

async fn audit(state: &PortalState, entry: AuditEntry) {
    record_best_effort(state.stores.audit.as_ref(), entry).await;
}

async fn require_project(state: &PortalState, project_id: Uuid) -> ApiResult<Project> {
    state
        .stores
        .projects
        .get_project(project_id)
        .await?
        .ok_or_else(|| PortalError::not_found("project", project_id).into())
}

// ── Catalog ──

#[derive(Debug, Serialize)]
pub struct CatalogFilesResponse {
    pub files: Vec<String>,
}

pub async fn list_catalog_files(
    State(state): State<PortalState>,
) -> ApiResult<Json<CatalogFilesResponse>> {
    let files = state.catalog.list_files().await?;
    Ok(Json(CatalogFilesResponse { files }))
}

#[derive(Debug, Deserialize)]
pub struct SyncBatchRequest {
    #[serde(default)]
    pub mappings: Vec<SyncMapping>,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub results: Vec<SyncResult>,
}

/// Always 200: per-item failures are reported in `results`.
pub async fn sync_catalog(
    State(state): State<PortalState>,
    headers: HeaderMap,
    Json(req): Json<SyncBatchRequest>,
) -> Json<ResultsResponse> {
    let results = state.catalog.sync_batch(req.mappings, &actor(&headers)).await;
    Json(ResultsResponse { results })
}

// ── Teams ──

pub async fn list_teams(State(state): State<PortalState>) -> ApiResult<Json<Vec<Team>>> {
    Ok(Json(state.stores.teams.list_teams().await?))
}

pub async fn create_team(
    State(state): State<PortalState>,
    headers: HeaderMap,
    Json(mut req): Json<NewTeam>,
) -> ApiResult<(StatusCode, Json<Team>)> {
    req.name = req.name.trim().to_string();
    if req.name.is_empty() {
        return Err(PortalError::Validation("name is required".into()).into());
    }
    let team = state.stores.teams.create_team(req).await?;
    audit(&state, AuditEntry::new(&actor(&headers), "team.create", "team", &team.name)).await;
    Ok((StatusCode::CREATED, Json(team)))
}

// ── Projects ──

pub async fn list_projects(State(state): State<PortalState>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.stores.projects.list_projects().await?))
}

pub async fn create_project(
    State(state): State<PortalState>,
    headers: HeaderMap,
    Json(mut req): Json<NewProject>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    req.name = req.name.trim().to_string();
    if req.name.is_empty() {
        return Err(PortalError::Validation("name is required".into()).into());
    }
    if state.stores.teams.find_team(req.owner_team_id).await?.is_none() {
        return Err(PortalError::not_found("team", req.owner_team_id).into());
    }

    let project = state.stores.projects.create_project(req).await?;
    audit(
        &state,
        AuditEntry::new(&actor(&headers), "project.create", "project", &project.name),
    )
    .await;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<PortalState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Project>> {
    Ok(Json(require_project(&state, project_id).await?))
}

/// Name and description of a catalog-managed project belong to its file;
/// only the owner may be changed here.
pub async fn update_project(
    State(state): State<PortalState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    Json(patch): Json<ProjectPatch>,
) -> ApiResult<Json<Project>> {
    if patch.is_empty() {
        return Err(PortalError::Validation("no fields to update".into()).into());
    }
    let project = require_project(&state, project_id).await?;
    if let Some(path) = &project.catalog_file_path {
        if patch.name.is_some() || patch.description.is_some() {
            return Err(PortalError::Conflict(format!(
                "project is managed by catalog file '{path}'"
            ))
            .into());
        }
    }
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(PortalError::Validation("name must not be empty".into()).into());
        }
    }
    if let Some(team_id) = patch.owner_team_id {
        if state.stores.teams.find_team(team_id).await?.is_none() {
            return Err(PortalError::not_found("team", team_id).into());
        }
    }

    let updated = state.stores.projects.update_project(project_id, patch).await?;
    audit(
        &state,
        AuditEntry::new(&actor(&headers), "project.update", "project", &updated.name),
    )
    .await;
    Ok(Json(updated))
}

// ── Resources ──

pub async fn list_resources(
    State(state): State<PortalState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Vec<DiscoveredResource>>> {
    require_project(&state, project_id).await?;
    Ok(Json(state.stores.resources.list_resources(project_id).await?))
}

/// Hard delete; the only path that removes a resource row.
pub async fn delete_resource(
    State(state): State<PortalState>,
    Path((project_id, resource_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let project = require_project(&state, project_id).await?;
    if !state
        .stores
        .resources
        .delete_resource(project_id, resource_id)
        .await?
    {
        return Err(PortalError::not_found("resource", resource_id).into());
    }
    audit(
        &state,
        AuditEntry::new(&actor(&headers), "resource.delete", "resource", &resource_id.to_string())
            .details(json!({ "project": project.name })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DiscoveryRequest {
    pub secret_id: Uuid,
    pub region: String,
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
}

pub async fn run_discovery(
    State(state): State<PortalState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<DiscoveryRequest>,
) -> ApiResult<Json<SweepReport>> {
    let _guard = state.sweep_locks.acquire(project_id, req.secret_id).await;
    let report = state
        .resources
        .sweep(
            SweepRequest {
                project_id,
                secret_id: req.secret_id,
                region: req.region,
                resource_types: req.resource_types,
            },
            &actor(&headers),
        )
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct AssociateRequest {
    pub secret_id: Uuid,
    #[serde(default)]
    pub resources: Vec<ResourceCandidate>,
}

pub async fn associate_resources(
    State(state): State<PortalState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<AssociateRequest>,
) -> ApiResult<Json<ResultsResponse>> {
    let results = state
        .resources
        .associate(project_id, req.secret_id, req.resources, &actor(&headers))
        .await?;
    Ok(Json(ResultsResponse { results }))
}

#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    pub secret_id: Uuid,
    pub resource_type: ResourceType,
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ProvisionAccepted {
    pub id: Uuid,
    pub status: String,
}

/// 202: the request is persisted as pending and runs in the background.
pub async fn provision_resource(
    State(state): State<PortalState>,
    Path(project_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ProvisionRequest>,
) -> ApiResult<(StatusCode, Json<ProvisionAccepted>)> {
    let spec = ProvisionSpec {
        resource_type: req.resource_type,
        name: req.name.trim().to_string(),
        region: req.region.trim().to_string(),
        attributes: req.attributes,
    };
    let request = state
        .provisioning
        .submit(project_id, req.secret_id, spec, &actor(&headers))
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ProvisionAccepted {
            id: request.id,
            status: request.status.as_str().to_string(),
        }),
    ))
}

pub async fn get_provisioning(
    State(state): State<PortalState>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<ProvisioningRequest>> {
    Ok(Json(state.provisioning.status(request_id).await?))
}

// ── Credentials ──

#[derive(Debug, Deserialize)]
pub struct CreateSecretRequest {
    pub name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(flatten)]
    pub credential: CloudCredential,
}

fn default_provider() -> String {
    "aws".to_string()
}

pub async fn create_secret(
    State(state): State<PortalState>,
    headers: HeaderMap,
    Json(req): Json<CreateSecretRequest>,
) -> ApiResult<(StatusCode, Json<StoredSecret>)> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(PortalError::Validation("name is required".into()).into());
    }
    if req.credential.access_key_id.is_empty() || req.credential.secret_access_key.is_empty() {
        return Err(PortalError::Validation(
            "access_key_id and secret_access_key are required".into(),
        )
        .into());
    }
    let stored = state
        .vault
        .store_credential(name, &req.provider, &req.credential)
        .await?;
    audit(
        &state,
        AuditEntry::new(&actor(&headers), "secret.create", "secret", &stored.name)
            .details(json!({ "secret_id": stored.id, "provider": stored.provider })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(stored)))
}

// ── Audit ──

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

pub async fn list_audit(
    State(state): State<PortalState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<AuditRecord>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.stores.audit.list_recent(limit).await?))
}

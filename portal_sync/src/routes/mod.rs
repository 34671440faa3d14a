//! Portal HTTP routes — GitHub webhook and the catalog/resource API.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::services::catalog_reader::CatalogSource;
use crate::services::catalog_sync::CatalogSyncService;
use crate::services::discovery::CloudInventory;
use crate::services::provisioner::{ProvisionJob, ProvisionWorker, ProvisioningService};
use crate::services::resource_sync::ResourceSyncService;
use crate::services::sweep_lock::SweepLocks;
use crate::services::vault::SecretVault;
use crate::store::Stores;

/// Actor recorded when a request carries no `X-Actor-Email`.
pub const DEFAULT_ACTOR: &str = "system";

/// Shared state for portal route handlers.
#[derive(Clone)]
pub struct PortalState {
    pub config: Arc<PortalConfig>,
    pub stores: Stores,
    pub catalog: Arc<CatalogSyncService>,
    pub resources: Arc<ResourceSyncService>,
    pub provisioning: Arc<ProvisioningService>,
    pub vault: Arc<SecretVault>,
    pub sweep_locks: Arc<SweepLocks>,
}

/// Background half of provisioning, handed to `run_provisioner`.
pub struct ProvisionRuntime {
    pub jobs: mpsc::Receiver<ProvisionJob>,
    pub worker: Arc<ProvisionWorker>,
}

impl PortalState {
    pub fn build(
        config: PortalConfig,
        stores: Stores,
        source: Arc<dyn CatalogSource>,
        vault: Arc<SecretVault>,
        inventory: Arc<dyn CloudInventory>,
    ) -> (Self, ProvisionRuntime) {
        let catalog = CatalogSyncService::new(source, &stores)
            .with_fallback_team(config.webhook_team_id);
        let resources = Arc::new(ResourceSyncService::new(
            &stores,
            vault.clone(),
            inventory.clone(),
        ));

        let (tx, rx) = mpsc::channel(config.max_concurrent_provisions.max(1) * 16);
        let provisioning = ProvisioningService::new(&stores, tx);
        let worker = ProvisionWorker::new(&stores, vault.clone(), inventory, resources.clone());

        let state = Self {
            config: Arc::new(config),
            stores,
            catalog: Arc::new(catalog),
            resources,
            provisioning: Arc::new(provisioning),
            vault,
            sweep_locks: Arc::new(SweepLocks::new()),
        };
        (
            state,
            ProvisionRuntime {
                jobs: rx,
                worker: Arc::new(worker),
            },
        )
    }
}

/// Build the portal's Axum router (nested at `/portal`).
pub fn portal_router(state: PortalState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Webhook
        .route("/webhook/github", post(webhook_handler))
        // Catalog API
        .route("/api/catalog/files", get(api::list_catalog_files))
        .route("/api/catalog/sync", post(api::sync_catalog))
        // Team API
        .route("/api/teams", get(api::list_teams).post(api::create_team))
        // Project API
        .route("/api/projects", get(api::list_projects).post(api::create_project))
        .route(
            "/api/projects/{project_id}",
            get(api::get_project).patch(api::update_project),
        )
        // Resource API
        .route("/api/projects/{project_id}/resources", get(api::list_resources))
        .route(
            "/api/projects/{project_id}/resources/{resource_id}",
            delete(api::delete_resource),
        )
        .route("/api/projects/{project_id}/discovery", post(api::run_discovery))
        .route(
            "/api/projects/{project_id}/resources/associate",
            post(api::associate_resources),
        )
        .route(
            "/api/projects/{project_id}/resources/provision",
            post(api::provision_resource),
        )
        .route("/api/provisioning/{request_id}", get(api::get_provisioning))
        // Credentials
        .route("/api/secrets", post(api::create_secret))
        // Audit
        .route("/api/audit", get(api::list_audit))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<PortalState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    crate::metrics::webhook_received(
        headers
            .get("x-github-event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(&state, &headers, body).await.map(Json)
}

// ── Shared helpers ──

/// Identity behind a request, from `X-Actor-Email`.
pub fn actor(headers: &HeaderMap) -> String {
    headers
        .get("x-actor-email")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string()
}

/// JSON error response: `{"status": "error", "error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<PortalError> for ApiError {
    fn from(e: PortalError) -> Self {
        let status = match &e {
            PortalError::NotFound { .. } | PortalError::CredentialNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            PortalError::Parse(_) | PortalError::Validation(_) => StatusCode::BAD_REQUEST,
            PortalError::Conflict(_) => StatusCode::CONFLICT,
            PortalError::SourceUnavailable(_) | PortalError::Provision(_) => {
                StatusCode::BAD_GATEWAY
            }
            PortalError::Store(_) | PortalError::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {e}");
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "status": "error", "error": self.message })),
        )
            .into_response()
    }
}

//! GitHub webhook handler — receives push events, syncs changed catalog files.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use serde_json::json;

use crate::routes::{ApiError, PortalState};
use crate::services::github_service;
use crate::services::webhook_delta::{changed_catalog_files, PushEvent};

/// Actor recorded for syncs triggered by GitHub.
pub const WEBHOOK_ACTOR: &str = "webhook:github";

/// Handle an incoming GitHub webhook payload.
pub async fn handle_webhook(
    state: &PortalState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<serde_json::Value, ApiError> {
    // Validate signature before looking at the body
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !github_service::validate_signature(&state.config.webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid webhook signature"));
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    match event_type {
        "push" => handle_push(state, &body).await,
        "ping" => {
            tracing::info!("Received GitHub ping webhook");
            Ok(json!({ "status": "ignored", "reason": "ping" }))
        }
        _ => {
            tracing::debug!("Ignoring webhook event: {}", event_type);
            Ok(json!({ "status": "ignored", "reason": format!("event '{event_type}' is not handled") }))
        }
    }
}

async fn handle_push(state: &PortalState, body: &[u8]) -> Result<serde_json::Value, ApiError> {
    let event: PushEvent = serde_json::from_slice(body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("malformed push payload: {e}")))?;

    let catalog_ref = state.config.catalog_ref();
    if event.git_ref != catalog_ref {
        tracing::debug!(git_ref = %event.git_ref, "Push is not on the catalog branch");
        return Ok(json!({
            "status": "ignored",
            "reason": format!("ref '{}' is not {catalog_ref}", event.git_ref),
        }));
    }

    let files = changed_catalog_files(&event, &catalog_ref, &state.config.catalog_root);
    tracing::info!(
        after = event.after.as_deref().unwrap_or_default(),
        changed = files.len(),
        "Catalog push received"
    );

    let mut results = Vec::with_capacity(files.len());
    for path in &files {
        results.push(state.catalog.sync_file(path, None, WEBHOOK_ACTOR).await);
    }

    Ok(json!({ "status": "processed", "results": results }))
}

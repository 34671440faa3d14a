//! Asynchronous provisioning — requests are persisted as `pending`, handed
//! to a background worker over a channel, and resolved to `succeeded` or
//! `failed`. A created resource registers itself on the project as `active`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use regex::Regex;
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::error::{PortalError, PortalResult};
use crate::models::audit::AuditEntry;
use crate::models::provisioning::{NewProvisioningRequest, ProvisionSpec, ProvisioningRequest};
use crate::models::resource::ResourceType;
use crate::services::audit_service::record_best_effort;
use crate::services::discovery::CloudInventory;
use crate::services::resource_sync::ResourceSyncService;
use crate::services::vault::CredentialVault;
use crate::store::{AuditSink, ProjectStore, ProvisioningStore, SecretStore, Stores};

static S3_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").unwrap());
static SQS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,75}(\.fifo)?$").unwrap());
static SNS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,251}(\.fifo)?$").unwrap());
static REGION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d$").unwrap());

/// Reject specs the provider would refuse before anything is persisted.
pub fn validate_spec(spec: &ProvisionSpec) -> PortalResult<()> {
    if !REGION.is_match(&spec.region) {
        return Err(PortalError::Validation(format!(
            "invalid region '{}'",
            spec.region
        )));
    }
    let rule = match spec.resource_type {
        ResourceType::S3 => &S3_NAME,
        ResourceType::Sqs => &SQS_NAME,
        ResourceType::Sns => &SNS_NAME,
        other => {
            return Err(PortalError::Validation(format!(
                "provisioning {other} resources is not supported"
            )))
        }
    };
    if !rule.is_match(&spec.name) || spec.name.contains("..") {
        return Err(PortalError::Validation(format!(
            "invalid {} name '{}'",
            spec.resource_type, spec.name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ProvisionJob {
    pub request_id: Uuid,
    pub project_id: Uuid,
    pub secret_id: Uuid,
    pub spec: ProvisionSpec,
    pub actor: String,
}

/// Request-side half: validates and enqueues.
pub struct ProvisioningService {
    projects: Arc<dyn ProjectStore>,
    secrets: Arc<dyn SecretStore>,
    requests: Arc<dyn ProvisioningStore>,
    jobs: mpsc::Sender<ProvisionJob>,
}

impl ProvisioningService {
    pub fn new(stores: &Stores, jobs: mpsc::Sender<ProvisionJob>) -> Self {
        Self {
            projects: stores.projects.clone(),
            secrets: stores.secrets.clone(),
            requests: stores.provisioning.clone(),
            jobs,
        }
    }

    pub async fn submit(
        &self,
        project_id: Uuid,
        secret_id: Uuid,
        spec: ProvisionSpec,
        actor: &str,
    ) -> PortalResult<ProvisioningRequest> {
        validate_spec(&spec)?;
        if self.projects.get_project(project_id).await?.is_none() {
            return Err(PortalError::not_found("project", project_id));
        }
        if self.secrets.find_secret(secret_id).await?.is_none() {
            return Err(PortalError::CredentialNotFound(secret_id.to_string()));
        }

        let request = self
            .requests
            .create_request(NewProvisioningRequest {
                project_id,
                secret_id,
                spec: spec.clone(),
                requested_by: actor.to_string(),
            })
            .await?;

        let job = ProvisionJob {
            request_id: request.id,
            project_id,
            secret_id,
            spec,
            actor: actor.to_string(),
        };
        if self.jobs.send(job).await.is_err() {
            let message = "provisioning worker is not running";
            self.requests.fail_request(request.id, message).await?;
            return Err(PortalError::Provision(message.into()));
        }

        tracing::info!(
            request_id = %request.id,
            project_id = %project_id,
            resource_type = %request.spec.resource_type,
            name = %request.spec.name,
            "Provisioning request queued"
        );
        Ok(request)
    }

    pub async fn status(&self, request_id: Uuid) -> PortalResult<ProvisioningRequest> {
        self.requests
            .get_request(request_id)
            .await?
            .ok_or_else(|| PortalError::not_found("provisioning request", request_id))
    }
}

/// Worker-side half: runs jobs against the cloud provider.
pub struct ProvisionWorker {
    vault: Arc<dyn CredentialVault>,
    inventory: Arc<dyn CloudInventory>,
    resources: Arc<ResourceSyncService>,
    requests: Arc<dyn ProvisioningStore>,
    audit: Arc<dyn AuditSink>,
    in_flight: AtomicUsize,
}

impl ProvisionWorker {
    pub fn new(
        stores: &Stores,
        vault: Arc<dyn CredentialVault>,
        inventory: Arc<dyn CloudInventory>,
        resources: Arc<ResourceSyncService>,
    ) -> Self {
        Self {
            vault,
            inventory,
            resources,
            requests: stores.provisioning.clone(),
            audit: stores.audit.clone(),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Run one job to completion and persist its outcome.
    pub async fn execute(&self, job: ProvisionJob) {
        let started = Instant::now();
        crate::metrics::provisioning_in_flight(self.in_flight.fetch_add(1, Ordering::SeqCst) + 1);

        let outcome = self.provision(&job).await;
        let status = if outcome.is_ok() { "succeeded" } else { "failed" };

        let persisted = match &outcome {
            Ok(created) => self.requests.complete_request(job.request_id, &created.arn).await,
            Err(e) => self.requests.fail_request(job.request_id, &e.to_string()).await,
        };
        if let Err(e) = persisted {
            tracing::error!(request_id = %job.request_id, "Failed to record provisioning outcome: {e}");
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        crate::metrics::provisioning_finished(status, duration_ms);
        crate::metrics::provisioning_in_flight(self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1);

        match &outcome {
            Ok(created) => tracing::info!(request_id = %job.request_id, arn = %created.arn, duration_ms, "Provisioning succeeded"),
            Err(e) => tracing::warn!(request_id = %job.request_id, duration_ms, "Provisioning failed: {e}"),
        }

        let entry = AuditEntry::new(
            &job.actor,
            "resource.provision",
            job.spec.resource_type.as_str(),
            &job.spec.name,
        )
        .status(status)
        .details(json!({
            "request_id": job.request_id,
            "project_id": job.project_id,
            "region": job.spec.region,
            "arn": outcome.as_ref().ok().map(|c| &c.arn),
            "registration_error": outcome.as_ref().ok().and_then(|c| c.registration_error.as_ref()),
            "error": outcome.as_ref().err().map(ToString::to_string),
        }));
        record_best_effort(self.audit.as_ref(), entry).await;
    }

    /// Once the cloud resource exists the job has succeeded. A failure to
    /// register it locally is reported next to the ARN.
    async fn provision(&self, job: &ProvisionJob) -> PortalResult<CreatedResource> {
        let credential = self.vault.get_decrypted_credential(job.secret_id).await?;
        let provisioned = self.inventory.create_resource(&credential, &job.spec).await?;
        let registration_error = match self
            .resources
            .register_provisioned(job.project_id, job.secret_id, &job.spec, &provisioned)
            .await
        {
            Ok(_) => None,
            Err(e) => {
                tracing::error!(
                    request_id = %job.request_id,
                    arn = %provisioned.arn,
                    "Provisioned resource could not be registered: {e}"
                );
                Some(e.to_string())
            }
        };
        Ok(CreatedResource {
            arn: provisioned.arn,
            registration_error,
        })
    }
}

struct CreatedResource {
    arn: String,
    registration_error: Option<String>,
}

/// Consume provisioning jobs until every sender is dropped. Spawned as a
/// background tokio task; at most `max_concurrent` jobs run at once.
pub async fn run_provisioner(
    mut jobs: mpsc::Receiver<ProvisionJob>,
    worker: Arc<ProvisionWorker>,
    max_concurrent: usize,
) {
    tracing::info!(max_concurrent, "Provisioning worker started");
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));

    while let Some(job) = jobs.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let worker = worker.clone();
        tokio::spawn(async move {
            worker.execute(job).await;
            drop(permit);
        });
    }

    tracing::info!("Provisioning worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(resource_type: ResourceType, name: &str) -> ProvisionSpec {
        ProvisionSpec {
            resource_type,
            name: name.to_string(),
            region: "eu-west-1".to_string(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(validate_spec(&spec(ResourceType::S3, "team-artifacts.prod")).is_ok());
        assert!(validate_spec(&spec(ResourceType::S3, "Upper")).is_err());
        assert!(validate_spec(&spec(ResourceType::S3, "ab")).is_err());
        assert!(validate_spec(&spec(ResourceType::S3, "a..b")).is_err());
    }

    #[test]
    fn queue_and_topic_names() {
        assert!(validate_spec(&spec(ResourceType::Sqs, "Orders_v2.fifo")).is_ok());
        assert!(validate_spec(&spec(ResourceType::Sqs, "bad name")).is_err());
        assert!(validate_spec(&spec(ResourceType::Sns, "alerts")).is_ok());
    }

    #[test]
    fn unsupported_types_and_bad_regions_are_rejected() {
        assert!(validate_spec(&spec(ResourceType::Rds, "db")).is_err());
        let mut s = spec(ResourceType::Sns, "alerts");
        s.region = "mars".into();
        assert!(validate_spec(&s).is_err());
    }
}

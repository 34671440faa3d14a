mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use common::{bucket, queue, test_config, Harness};
use portal_sync::error::{PortalError, PortalResult};
use portal_sync::models::project::{NewProject, Project};
use portal_sync::models::provisioning::{ProvisionSpec, ProvisioningStatus};
use portal_sync::models::resource::{
    DiscoveredResource, ResourceStatus, ResourceType, ResourceUpsert, SweepScope,
};
use portal_sync::models::sync_result::SyncOutcome;
use portal_sync::services::resource_sync::SweepRequest;
use portal_sync::store::{MemoryStore, ProjectStore, ResourceStore, Stores};

const REGION: &str = "eu-west-1";

async fn project(h: &Harness) -> Project {
    let team = h.team("platform").await;
    h.store
        .create_project(NewProject {
            name: "storefront".into(),
            description: String::new(),
            owner_team_id: team.id,
            kind: Default::default(),
        })
        .await
        .unwrap()
}

fn sweep(project_id: Uuid, secret_id: Uuid, types: &[ResourceType]) -> SweepRequest {
    SweepRequest {
        project_id,
        secret_id,
        region: REGION.into(),
        resource_types: types.to_vec(),
    }
}

async fn by_name(h: &Harness, project_id: Uuid, name: &str) -> DiscoveredResource {
    h.store
        .list_resources(project_id)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no resource named {name}"))
}

#[tokio::test]
async fn vanished_bucket_is_marked_deleted_and_comes_back_on_rediscovery() {
    let h = Harness::new();
    let project = project(&h).await;
    let secret = h.secret().await;

    h.inventory
        .set_resources(vec![bucket("my-bucket", REGION), bucket("old-bucket", REGION)]);
    let first = h
        .state
        .resources
        .sweep(sweep(project.id, secret, &[ResourceType::S3]), "system")
        .await
        .unwrap();
    assert_eq!(first.results.len(), 2);
    assert!(first.results.iter().all(|r| r.status == SyncOutcome::Created));
    assert_eq!(first.marked_deleted, 0);
    let old_id = by_name(&h, project.id, "old-bucket").await.id;

    h.inventory.set_resources(vec![bucket("my-bucket", REGION)]);
    let second = h
        .state
        .resources
        .sweep(sweep(project.id, secret, &[ResourceType::S3]), "system")
        .await
        .unwrap();
    assert_eq!(second.marked_deleted, 1);
    assert_eq!(second.results[0].status, SyncOutcome::Updated);
    assert_eq!(by_name(&h, project.id, "my-bucket").await.status, ResourceStatus::Active);
    assert_eq!(by_name(&h, project.id, "old-bucket").await.status, ResourceStatus::Deleted);

    h.inventory
        .set_resources(vec![bucket("my-bucket", REGION), bucket("old-bucket", REGION)]);
    let third = h
        .state
        .resources
        .sweep(sweep(project.id, secret, &[ResourceType::S3]), "system")
        .await
        .unwrap();
    assert_eq!(third.marked_deleted, 0);

    let all = h.store.list_resources(project.id).await.unwrap();
    assert_eq!(all.len(), 2);
    let old = by_name(&h, project.id, "old-bucket").await;
    assert_eq!(old.id, old_id);
    assert_eq!(old.status, ResourceStatus::Active);
}

#[tokio::test]
async fn failed_listing_keeps_that_type_untouched() {
    let h = Harness::new();
    let project = project(&h).await;
    let secret = h.secret().await;

    h.inventory
        .set_resources(vec![bucket("assets", REGION), queue("orders", REGION)]);
    h.state
        .resources
        .sweep(sweep(project.id, secret, &[]), "system")
        .await
        .unwrap();

    h.inventory.set_resources(vec![]);
    h.inventory.fail_type(ResourceType::Sqs);
    let report = h
        .state
        .resources
        .sweep(sweep(project.id, secret, &[]), "system")
        .await
        .unwrap();

    assert!(report.type_errors.contains_key(&ResourceType::Sqs));
    assert_eq!(report.marked_deleted, 1);
    assert_eq!(by_name(&h, project.id, "orders").await.status, ResourceStatus::Active);
    assert_eq!(by_name(&h, project.id, "assets").await.status, ResourceStatus::Deleted);
}

#[tokio::test]
async fn sweep_only_touches_its_region_and_credential() {
    let h = Harness::new();
    let project = project(&h).await;
    let secret = h.secret().await;
    let other_secret = h.secret().await;

    h.inventory.set_resources(vec![bucket("eu-assets", REGION)]);
    h.state
        .resources
        .sweep(sweep(project.id, secret, &[ResourceType::S3]), "system")
        .await
        .unwrap();

    h.inventory.set_resources(vec![bucket("us-assets", "us-east-1")]);
    h.state
        .resources
        .sweep(
            SweepRequest {
                region: "us-east-1".into(),
                ..sweep(project.id, secret, &[ResourceType::S3])
            },
            "system",
        )
        .await
        .unwrap();

    h.inventory.set_resources(vec![]);
    let report = h
        .state
        .resources
        .sweep(sweep(project.id, other_secret, &[ResourceType::S3]), "system")
        .await
        .unwrap();
    assert_eq!(report.marked_deleted, 0);
    assert_eq!(by_name(&h, project.id, "eu-assets").await.status, ResourceStatus::Active);
    assert_eq!(by_name(&h, project.id, "us-assets").await.status, ResourceStatus::Active);
}

#[tokio::test]
async fn undiscoverable_types_are_reported_per_type() {
    let h = Harness::new();
    let project = project(&h).await;
    let secret = h.secret().await;

    let report = h
        .state
        .resources
        .sweep(sweep(project.id, secret, &[ResourceType::Rds]), "system")
        .await
        .unwrap();
    assert!(report.results.is_empty());
    assert!(report.type_errors.contains_key(&ResourceType::Rds));
}

#[tokio::test]
async fn sweep_requires_known_project_and_credential() {
    let h = Harness::new();
    let project = project(&h).await;
    let secret = h.secret().await;

    let err = h
        .state
        .resources
        .sweep(sweep(Uuid::new_v4(), secret, &[]), "system")
        .await
        .unwrap_err();
    assert!(matches!(err, PortalError::NotFound { .. }));

    let err = h
        .state
        .resources
        .sweep(sweep(project.id, Uuid::new_v4(), &[]), "system")
        .await
        .unwrap_err();
    assert!(matches!(err, PortalError::CredentialNotFound(_)));
}

#[tokio::test]
async fn manual_association_reports_conflicts() {
    let h = Harness::new();
    let project = project(&h).await;
    let secret = h.secret().await;

    h.inventory.set_resources(vec![bucket("my-bucket", REGION)]);
    h.state
        .resources
        .sweep(sweep(project.id, secret, &[ResourceType::S3]), "system")
        .await
        .unwrap();

    let mut nameless = bucket("x", REGION);
    nameless.name = " ".into();
    let results = h
        .state
        .resources
        .associate(
            project.id,
            secret,
            vec![
                bucket("my-bucket", REGION),
                queue("billing-events", REGION),
                queue("billing-events", REGION),
                nameless,
            ],
            "carol@example.com",
        )
        .await
        .unwrap();

    let statuses: Vec<SyncOutcome> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            SyncOutcome::Skipped,
            SyncOutcome::Created,
            SyncOutcome::Skipped,
            SyncOutcome::Failed,
        ]
    );
    assert_eq!(results[0].message, "already exists");
    assert_eq!(
        by_name(&h, project.id, "billing-events").await.status,
        ResourceStatus::Active
    );
    assert_eq!(h.store.list_resources(project.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn provisioning_is_pending_then_registers_resource() {
    let mut h = Harness::new();
    let project = project(&h).await;
    let secret = h.secret().await;

    let request = h
        .state
        .provisioning
        .submit(
            project.id,
            secret,
            ProvisionSpec {
                resource_type: ResourceType::Sqs,
                name: "order-events".into(),
                region: REGION.into(),
                attributes: BTreeMap::from([("VisibilityTimeout".into(), "60".into())]),
            },
            "dave@example.com",
        )
        .await
        .unwrap();
    assert_eq!(request.status, ProvisioningStatus::Pending);
    assert_eq!(
        h.state.provisioning.status(request.id).await.unwrap().status,
        ProvisioningStatus::Pending
    );

    let mut runtime = h.runtime.take().unwrap();
    let job = runtime.jobs.recv().await.unwrap();
    assert_eq!(job.request_id, request.id);
    runtime.worker.execute(job).await;

    let done = h.state.provisioning.status(request.id).await.unwrap();
    assert_eq!(done.status, ProvisioningStatus::Succeeded);
    let arn = done.arn.unwrap();
    assert_eq!(arn, "arn:aws:sqs:eu-west-1:123456789012:order-events");
    assert!(done.completed_at.is_some());

    let resource = h
        .store
        .find_resource_by_arn(project.id, &arn)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resource.status, ResourceStatus::Active);
    assert_eq!(resource.secret_id, secret);
    assert_eq!(h.inventory.created().len(), 1);
}

#[tokio::test]
async fn invalid_provisioning_spec_is_rejected_before_persisting() {
    let h = Harness::new();
    let project = project(&h).await;
    let secret = h.secret().await;

    let err = h
        .state
        .provisioning
        .submit(
            project.id,
            secret,
            ProvisionSpec {
                resource_type: ResourceType::S3,
                name: "Not_A_Bucket".into(),
                region: REGION.into(),
                attributes: BTreeMap::new(),
            },
            "system",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PortalError::Validation(_)));
    assert!(h.inventory.created().is_empty());
}

/// Resource store that reads through to memory but refuses every write.
struct ReadOnlyResources(Arc<MemoryStore>);

#[async_trait]
impl ResourceStore for ReadOnlyResources {
    async fn find_resource_by_arn(
        &self,
        project_id: Uuid,
        arn: &str,
    ) -> PortalResult<Option<DiscoveredResource>> {
        self.0.find_resource_by_arn(project_id, arn).await
    }

    async fn upsert_resource(&self, _upsert: ResourceUpsert) -> PortalResult<DiscoveredResource> {
        Err(PortalError::Store("connection reset".into()))
    }

    async fn mark_resources_unknown(&self, scope: &SweepScope) -> PortalResult<u64> {
        self.0.mark_resources_unknown(scope).await
    }

    async fn mark_unknown_resources_deleted(&self, scope: &SweepScope) -> PortalResult<u64> {
        self.0.mark_unknown_resources_deleted(scope).await
    }

    async fn list_resources(&self, project_id: Uuid) -> PortalResult<Vec<DiscoveredResource>> {
        self.0.list_resources(project_id).await
    }

    async fn delete_resource(&self, project_id: Uuid, resource_id: Uuid) -> PortalResult<bool> {
        self.0.delete_resource(project_id, resource_id).await
    }
}

#[tokio::test]
async fn created_resource_keeps_its_arn_when_registration_fails() {
    let store = Arc::new(MemoryStore::new());
    let mut stores = Stores::memory(store.clone());
    stores.resources = Arc::new(ReadOnlyResources(store.clone()));
    let mut h = Harness::assemble(test_config(), store, stores);
    let project = project(&h).await;
    let secret = h.secret().await;

    let request = h
        .state
        .provisioning
        .submit(
            project.id,
            secret,
            ProvisionSpec {
                resource_type: ResourceType::Sns,
                name: "alerts".into(),
                region: REGION.into(),
                attributes: BTreeMap::new(),
            },
            "dave@example.com",
        )
        .await
        .unwrap();

    let mut runtime = h.runtime.take().unwrap();
    let job = runtime.jobs.recv().await.unwrap();
    runtime.worker.execute(job).await;

    let done = h.state.provisioning.status(request.id).await.unwrap();
    assert_eq!(done.status, ProvisioningStatus::Succeeded);
    assert_eq!(
        done.arn.as_deref(),
        Some("arn:aws:sns:eu-west-1:123456789012:alerts")
    );
    assert_eq!(h.inventory.created().len(), 1);
    assert!(h.store.list_resources(project.id).await.unwrap().is_empty());

    let audit = h.store.audit_entries().await;
    let provision = audit
        .iter()
        .find(|e| e.action == "resource.provision")
        .unwrap();
    assert_eq!(provision.status, "succeeded");
    assert!(provision.details["registration_error"]
        .as_str()
        .unwrap()
        .contains("connection reset"));
}

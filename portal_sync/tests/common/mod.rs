#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use portal_sync::config::PortalConfig;
use portal_sync::error::{PortalError, PortalResult};
use portal_sync::models::declaration::CatalogDeclaration;
use portal_sync::models::provisioning::{ProvisionSpec, ProvisionedResource};
use portal_sync::models::resource::{ResourceCandidate, ResourceType};
use portal_sync::models::secret::CloudCredential;
use portal_sync::models::team::{NewTeam, Team};
use portal_sync::routes::{PortalState, ProvisionRuntime};
use portal_sync::services::catalog_reader::CatalogSource;
use portal_sync::services::discovery::{requested_types, CloudInventory, DiscoveryOutcome};
use portal_sync::services::vault::{CredentialCipher, SecretVault};
use portal_sync::store::{MemoryStore, Stores, TeamStore};

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Catalog files held in memory, keyed by path.
#[derive(Default)]
pub struct StaticCatalogSource {
    files: Mutex<HashMap<String, String>>,
    unavailable: Mutex<bool>,
}

impl StaticCatalogSource {
    pub fn put(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn list_candidate_files(&self) -> PortalResult<Vec<String>> {
        if *self.unavailable.lock().unwrap() {
            return Err(PortalError::SourceUnavailable("github is down".into()));
        }
        let mut files: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        files.sort();
        Ok(files)
    }

    async fn fetch_and_parse(&self, path: &str) -> PortalResult<CatalogDeclaration> {
        if *self.unavailable.lock().unwrap() {
            return Err(PortalError::SourceUnavailable("github is down".into()));
        }
        let content = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| PortalError::not_found("catalog file", path))?;
        CatalogDeclaration::parse(path, &content)
    }
}

/// Cloud account whose contents tests set directly.
#[derive(Default)]
pub struct StaticInventory {
    resources: Mutex<Vec<ResourceCandidate>>,
    failing: Mutex<BTreeSet<ResourceType>>,
    created: Mutex<Vec<ProvisionSpec>>,
}

impl StaticInventory {
    pub fn set_resources(&self, resources: Vec<ResourceCandidate>) {
        *self.resources.lock().unwrap() = resources;
    }

    pub fn fail_type(&self, resource_type: ResourceType) {
        self.failing.lock().unwrap().insert(resource_type);
    }

    pub fn created(&self) -> Vec<ProvisionSpec> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudInventory for StaticInventory {
    async fn list_resources(
        &self,
        _credential: &CloudCredential,
        region: &str,
        types: &[ResourceType],
    ) -> PortalResult<DiscoveryOutcome> {
        let failing = self.failing.lock().unwrap().clone();
        let mut outcome = DiscoveryOutcome::default();
        for t in requested_types(types) {
            if failing.contains(&t) || !t.is_discoverable() {
                outcome.type_errors.insert(t, format!("{t} listing failed"));
            }
        }
        outcome.candidates = self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.region == region && requested_types(types).contains(&r.resource_type))
            .filter(|r| !outcome.type_errors.contains_key(&r.resource_type))
            .cloned()
            .collect();
        Ok(outcome)
    }

    async fn create_resource(
        &self,
        _credential: &CloudCredential,
        spec: &ProvisionSpec,
    ) -> PortalResult<ProvisionedResource> {
        self.created.lock().unwrap().push(spec.clone());
        let arn = match spec.resource_type {
            ResourceType::S3 => format!("arn:aws:s3:::{}", spec.name),
            ResourceType::Sqs => format!("arn:aws:sqs:{}:123456789012:{}", spec.region, spec.name),
            ResourceType::Sns => format!("arn:aws:sns:{}:123456789012:{}", spec.region, spec.name),
            other => return Err(PortalError::Provision(format!("{other} unsupported"))),
        };
        Ok(ProvisionedResource {
            arn,
            region: spec.region.clone(),
        })
    }
}

pub fn bucket(name: &str, region: &str) -> ResourceCandidate {
    ResourceCandidate {
        arn: format!("arn:aws:s3:::{name}"),
        resource_type: ResourceType::S3,
        name: name.to_string(),
        region: region.to_string(),
        metadata: serde_json::json!({}),
    }
}

pub fn queue(name: &str, region: &str) -> ResourceCandidate {
    ResourceCandidate {
        arn: format!("arn:aws:sqs:{region}:123456789012:{name}"),
        resource_type: ResourceType::Sqs,
        name: name.to_string(),
        region: region.to_string(),
        metadata: serde_json::json!({}),
    }
}

pub fn test_config() -> PortalConfig {
    test_config_with(&[])
}

/// The test configuration plus `extra` variables, which win on conflict.
pub fn test_config_with(extra: &[(&str, &str)]) -> PortalConfig {
    let mut vars: HashMap<&str, &str> = [
        ("PORTAL_CATALOG_OWNER", "acme"),
        ("PORTAL_CATALOG_REPO", "catalog"),
        ("PORTAL_CATALOG_BRANCH", "main"),
        ("PORTAL_CATALOG_ROOT", "projects"),
        ("PORTAL_WEBHOOK_SECRET", WEBHOOK_SECRET),
        ("PORTAL_VAULT_KEY", "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="),
    ]
    .into_iter()
    .collect();
    vars.extend(extra.iter().copied());
    PortalConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub stores: Stores,
    pub source: Arc<StaticCatalogSource>,
    pub inventory: Arc<StaticInventory>,
    pub vault: Arc<SecretVault>,
    pub state: PortalState,
    pub runtime: Option<ProvisionRuntime>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PortalConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::assemble(config, store.clone(), Stores::memory(store))
    }

    /// Wire the services over `stores`, which may replace some of the ports
    /// backed by `store`.
    pub fn assemble(config: PortalConfig, store: Arc<MemoryStore>, stores: Stores) -> Self {
        let source = Arc::new(StaticCatalogSource::default());
        let inventory = Arc::new(StaticInventory::default());
        let vault = Arc::new(SecretVault::new(
            stores.secrets.clone(),
            Some(CredentialCipher::new([9u8; 32])),
        ));
        let (state, runtime) = PortalState::build(
            config,
            stores.clone(),
            source.clone(),
            vault.clone(),
            inventory.clone(),
        );
        Self {
            store,
            stores,
            source,
            inventory,
            vault,
            state,
            runtime: Some(runtime),
        }
    }

    pub async fn team(&self, name: &str) -> Team {
        self.store
            .create_team(NewTeam {
                name: name.to_string(),
            })
            .await
            .unwrap()
    }

    pub async fn secret(&self) -> Uuid {
        self.vault
            .store_credential(
                "prod-account",
                "aws",
                &CloudCredential {
                    access_key_id: "AKIAEXAMPLE".into(),
                    secret_access_key: "secret".into(),
                    session_token: None,
                },
            )
            .await
            .unwrap()
            .id
    }
}

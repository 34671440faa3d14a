//! Cloud inventory — lists and creates AWS resources with a stored credential.
//!
//! Pagination is handled here; callers see one flat candidate list per
//! sweep. A failing resource type is reported in `type_errors` and never
//! aborts the other types.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::DateTimeFormat;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_sqs::types::QueueAttributeName;
use serde_json::json;

use crate::error::{PortalError, PortalResult};
use crate::models::provisioning::{ProvisionSpec, ProvisionedResource};
use crate::models::resource::{ResourceCandidate, ResourceType};
use crate::models::secret::CloudCredential;

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub candidates: Vec<ResourceCandidate>,
    /// Resource types whose listing failed, with the provider's message.
    pub type_errors: BTreeMap<ResourceType, String>,
}

impl DiscoveryOutcome {
    /// Requested types that were listed successfully.
    pub fn observed_types(&self, requested: &[ResourceType]) -> Vec<ResourceType> {
        requested
            .iter()
            .copied()
            .filter(|t| !self.type_errors.contains_key(t))
            .collect()
    }
}

/// Normalize a requested type list: empty means every discoverable type.
pub fn requested_types(types: &[ResourceType]) -> Vec<ResourceType> {
    let mut out: Vec<ResourceType> = if types.is_empty() {
        ResourceType::DISCOVERABLE.to_vec()
    } else {
        types.to_vec()
    };
    out.sort();
    out.dedup();
    out
}

#[async_trait]
pub trait CloudInventory: Send + Sync {
    async fn list_resources(
        &self,
        credential: &CloudCredential,
        region: &str,
        types: &[ResourceType],
    ) -> PortalResult<DiscoveryOutcome>;

    async fn create_resource(
        &self,
        credential: &CloudCredential,
        spec: &ProvisionSpec,
    ) -> PortalResult<ProvisionedResource>;
}

/// `https://sqs.<region>.amazonaws.com/<account>/<name>` to
/// `arn:aws:sqs:<region>:<account>:<name>`. Hosts that carry no region
/// (LocalStack) use `fallback_region`.
pub fn sqs_arn_from_url(queue_url: &str, fallback_region: &str) -> Option<String> {
    let rest = queue_url
        .strip_prefix("https://")
        .or_else(|| queue_url.strip_prefix("http://"))?;
    let mut parts = rest.trim_end_matches('/').split('/');
    let host = parts.next()?;
    let account = parts.next().filter(|s| !s.is_empty())?;
    let name = parts.next().filter(|s| !s.is_empty())?;
    if parts.next().is_some() {
        return None;
    }

    let region = match host.split('.').collect::<Vec<_>>().as_slice() {
        ["sqs", region, ..] => (*region).to_string(),
        [region, "queue", "amazonaws", ..] => (*region).to_string(),
        _ => fallback_region.to_string(),
    };
    Some(format!("arn:aws:sqs:{region}:{account}:{name}"))
}

fn last_arn_segment(arn: &str) -> &str {
    arn.rsplit(':').next().unwrap_or(arn)
}

pub struct AwsInventory {
    endpoint_url: Option<String>,
    timeout: Duration,
}

impl AwsInventory {
    pub fn new(endpoint_url: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint_url,
            timeout,
        }
    }

    async fn sdk_config(&self, credential: &CloudCredential, region: &str) -> SdkConfig {
        let creds = aws_sdk_s3::config::Credentials::new(
            &credential.access_key_id,
            &credential.secret_access_key,
            credential.session_token.clone(),
            None,
            "portal-vault",
        );
        let mut builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(creds)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(self.timeout)
                    .build(),
            );
        if let Some(url) = &self.endpoint_url {
            builder = builder.endpoint_url(url);
        }
        builder.load().await
    }

    fn s3_client(&self, config: &SdkConfig) -> aws_sdk_s3::Client {
        let s3_config = aws_sdk_s3::config::Builder::from(config)
            .force_path_style(self.endpoint_url.is_some())
            .build();
        aws_sdk_s3::Client::from_conf(s3_config)
    }

    async fn list_s3(&self, config: &SdkConfig, region: &str) -> Result<Vec<ResourceCandidate>, String> {
        let client = self.s3_client(config);
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = client
                .list_buckets()
                .bucket_region(region)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| format!("{}", DisplayErrorContext(&e)))?;

            for bucket in page.buckets() {
                let Some(name) = bucket.name() else { continue };
                let bucket_region = bucket.bucket_region().unwrap_or(region);
                if bucket_region != region {
                    continue;
                }
                let created = bucket
                    .creation_date()
                    .and_then(|d| d.fmt(DateTimeFormat::DateTime).ok());
                out.push(ResourceCandidate {
                    arn: format!("arn:aws:s3:::{name}"),
                    resource_type: ResourceType::S3,
                    name: name.to_string(),
                    region: region.to_string(),
                    metadata: json!({
                        "creation_date": created,
                        "bucket_region": bucket_region,
                    }),
                });
            }

            match page.continuation_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn list_sqs(&self, config: &SdkConfig, region: &str) -> Result<Vec<ResourceCandidate>, String> {
        let client = aws_sdk_sqs::Client::new(config);
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = client
                .list_queues()
                .set_next_token(token.take())
                .send()
                .await
                .map_err(|e| format!("{}", aws_sdk_sqs::error::DisplayErrorContext(&e)))?;

            for url in page.queue_urls() {
                let Some(arn) = sqs_arn_from_url(url, region) else {
                    tracing::warn!(queue_url = %url, "Skipping SQS queue with unrecognized URL");
                    continue;
                };
                out.push(ResourceCandidate {
                    name: last_arn_segment(&arn).to_string(),
                    arn,
                    resource_type: ResourceType::Sqs,
                    region: region.to_string(),
                    metadata: json!({ "queue_url": url }),
                });
            }

            match page.next_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn list_sns(&self, config: &SdkConfig, region: &str) -> Result<Vec<ResourceCandidate>, String> {
        let client = aws_sdk_sns::Client::new(config);
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = client
                .list_topics()
                .set_next_token(token.take())
                .send()
                .await
                .map_err(|e| format!("{}", aws_sdk_sns::error::DisplayErrorContext(&e)))?;

            for topic in page.topics() {
                let Some(arn) = topic.topic_arn() else { continue };
                out.push(ResourceCandidate {
                    arn: arn.to_string(),
                    resource_type: ResourceType::Sns,
                    name: last_arn_segment(arn).to_string(),
                    region: region.to_string(),
                    metadata: json!({}),
                });
            }

            match page.next_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl CloudInventory for AwsInventory {
    async fn list_resources(
        &self,
        credential: &CloudCredential,
        region: &str,
        types: &[ResourceType],
    ) -> PortalResult<DiscoveryOutcome> {
        let types = requested_types(types);
        let mut outcome = DiscoveryOutcome::default();

        let config = if types.iter().any(ResourceType::is_discoverable) {
            Some(self.sdk_config(credential, region).await)
        } else {
            None
        };

        for resource_type in types {
            let listed = match (resource_type, config.as_ref()) {
                (ResourceType::S3, Some(config)) => self.list_s3(config, region).await,
                (ResourceType::Sqs, Some(config)) => self.list_sqs(config, region).await,
                (ResourceType::Sns, Some(config)) => self.list_sns(config, region).await,
                (other, _) => Err(format!("discovery of {other} resources is not supported")),
            };
            match listed {
                Ok(mut candidates) => {
                    tracing::debug!(
                        resource_type = %resource_type,
                        region,
                        count = candidates.len(),
                        "Listed resources"
                    );
                    outcome.candidates.append(&mut candidates);
                }
                Err(message) => {
                    tracing::warn!(resource_type = %resource_type, region, "Resource listing failed: {message}");
                    outcome.type_errors.insert(resource_type, message);
                }
            }
        }
        Ok(outcome)
    }

    async fn create_resource(
        &self,
        credential: &CloudCredential,
        spec: &ProvisionSpec,
    ) -> PortalResult<ProvisionedResource> {
        let region = spec.region.as_str();
        match spec.resource_type {
            ResourceType::S3 => {
                let config = self.sdk_config(credential, region).await;
                let mut req = self.s3_client(&config).create_bucket().bucket(&spec.name);
                if region != "us-east-1" {
                    req = req.create_bucket_configuration(
                        CreateBucketConfiguration::builder()
                            .location_constraint(BucketLocationConstraint::from(region))
                            .build(),
                    );
                }
                req.send()
                    .await
                    .map_err(|e| PortalError::Provision(format!("{}", DisplayErrorContext(&e))))?;
                Ok(ProvisionedResource {
                    arn: format!("arn:aws:s3:::{}", spec.name),
                    region: region.to_string(),
                })
            }
            ResourceType::Sqs => {
                let config = self.sdk_config(credential, region).await;
                let attributes: HashMap<QueueAttributeName, String> = spec
                    .attributes
                    .iter()
                    .map(|(k, v)| (QueueAttributeName::from(k.as_str()), v.clone()))
                    .collect();
                let created = aws_sdk_sqs::Client::new(&config)
                    .create_queue()
                    .queue_name(&spec.name)
                    .set_attributes((!attributes.is_empty()).then_some(attributes))
                    .send()
                    .await
                    .map_err(|e| {
                        PortalError::Provision(format!(
                            "{}",
                            aws_sdk_sqs::error::DisplayErrorContext(&e)
                        ))
                    })?;
                let url = created
                    .queue_url()
                    .ok_or_else(|| PortalError::Provision("CreateQueue returned no queue URL".into()))?;
                let arn = sqs_arn_from_url(url, region).ok_or_else(|| {
                    PortalError::Provision(format!("unrecognized queue URL '{url}'"))
                })?;
                Ok(ProvisionedResource {
                    arn,
                    region: region.to_string(),
                })
            }
            ResourceType::Sns => {
                let config = self.sdk_config(credential, region).await;
                let attributes: HashMap<String, String> = spec
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let created = aws_sdk_sns::Client::new(&config)
                    .create_topic()
                    .name(&spec.name)
                    .set_attributes((!attributes.is_empty()).then_some(attributes))
                    .send()
                    .await
                    .map_err(|e| {
                        PortalError::Provision(format!(
                            "{}",
                            aws_sdk_sns::error::DisplayErrorContext(&e)
                        ))
                    })?;
                let arn = created
                    .topic_arn()
                    .ok_or_else(|| PortalError::Provision("CreateTopic returned no ARN".into()))?;
                Ok(ProvisionedResource {
                    arn: arn.to_string(),
                    region: region.to_string(),
                })
            }
            other => Err(PortalError::Provision(format!(
                "provisioning {other} resources is not supported"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqs_url_maps_to_arn() {
        assert_eq!(
            sqs_arn_from_url("https://sqs.eu-west-1.amazonaws.com/123456789012/orders", "us-east-1")
                .as_deref(),
            Some("arn:aws:sqs:eu-west-1:123456789012:orders")
        );
        assert_eq!(
            sqs_arn_from_url("https://us-west-2.queue.amazonaws.com/123456789012/jobs", "x")
                .as_deref(),
            Some("arn:aws:sqs:us-west-2:123456789012:jobs")
        );
        assert_eq!(
            sqs_arn_from_url("http://localhost:4566/000000000000/dev-queue", "us-east-1").as_deref(),
            Some("arn:aws:sqs:us-east-1:000000000000:dev-queue")
        );
        assert!(sqs_arn_from_url("not a url", "us-east-1").is_none());
        assert!(sqs_arn_from_url("https://sqs.us-east-1.amazonaws.com/123", "us-east-1").is_none());
    }

    #[test]
    fn empty_type_list_means_all_discoverable() {
        assert_eq!(
            requested_types(&[]),
            vec![ResourceType::S3, ResourceType::Sqs, ResourceType::Sns]
        );
        assert_eq!(
            requested_types(&[ResourceType::Sns, ResourceType::S3, ResourceType::Sns]),
            vec![ResourceType::S3, ResourceType::Sns]
        );
    }

    #[test]
    fn observed_types_exclude_failures() {
        let mut outcome = DiscoveryOutcome::default();
        outcome
            .type_errors
            .insert(ResourceType::Sqs, "AccessDenied".into());
        assert_eq!(
            outcome.observed_types(&[ResourceType::S3, ResourceType::Sqs]),
            vec![ResourceType::S3]
        );
    }

    #[tokio::test]
    async fn undiscoverable_types_yield_per_type_errors() {
        let inventory = AwsInventory::new(None, Duration::from_secs(1));
        let credential = CloudCredential {
            access_key_id: "AKIA".into(),
            secret_access_key: "x".into(),
            session_token: None,
        };
        let outcome = inventory
            .list_resources(&credential, "us-east-1", &[ResourceType::Rds, ResourceType::Lambda])
            .await
            .unwrap();
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.type_errors.len(), 2);
        assert!(outcome.type_errors[&ResourceType::Rds].contains("not supported"));
    }
}

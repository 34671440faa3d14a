//! portal.resource — cloud resources discovered for, or provisioned by, a project.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PortalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    S3,
    Sqs,
    Sns,
    Rds,
    Lambda,
}

impl ResourceType {
    /// Types the discovery scanner knows how to enumerate.
    pub const DISCOVERABLE: [ResourceType; 3] = [Self::S3, Self::Sqs, Self::Sns];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Sqs => "sqs",
            Self::Sns => "sns",
            Self::Rds => "rds",
            Self::Lambda => "lambda",
        }
    }

    pub fn is_discoverable(&self) -> bool {
        Self::DISCOVERABLE.contains(self)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(Self::S3),
            "sqs" => Ok(Self::Sqs),
            "sns" => Ok(Self::Sns),
            "rds" => Ok(Self::Rds),
            "lambda" => Ok(Self::Lambda),
            other => Err(PortalError::Validation(format!(
                "unknown resource type '{other}'"
            ))),
        }
    }
}

/// Status lifecycle of a discovered resource across sweeps.
///
/// `active` -> `unknown` (pre-sweep marker) -> `active` when observed again,
/// or `deleted` when the sweep completes without seeing it. `deleted` goes
/// back to `active` if a later sweep rediscovers the same ARN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Active,
    Unknown,
    Deleted,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Unknown => "unknown",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for ResourceStatus {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "unknown" => Ok(Self::Unknown),
            "deleted" => Ok(Self::Deleted),
            other => Err(PortalError::Store(format!("unknown resource status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub id: Uuid,
    pub project_id: Uuid,
    pub secret_id: Uuid,
    pub arn: String,
    pub resource_type: ResourceType,
    pub name: String,
    pub region: String,
    pub status: ResourceStatus,
    pub metadata: serde_json::Value,
    pub discovered_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

/// A resource as reported by the cloud provider, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCandidate {
    pub arn: String,
    pub resource_type: ResourceType,
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Upsert keyed by (project_id, arn). Always lands as `active`.
#[derive(Debug, Clone)]
pub struct ResourceUpsert {
    pub project_id: Uuid,
    pub secret_id: Uuid,
    pub candidate: ResourceCandidate,
    pub observed_at: DateTime<Utc>,
}

/// The set of records one sweep is allowed to transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepScope {
    pub project_id: Uuid,
    pub secret_id: Uuid,
    pub region: String,
    pub resource_types: Vec<ResourceType>,
}

impl SweepScope {
    pub fn contains(&self, resource: &DiscoveredResource) -> bool {
        resource.project_id == self.project_id
            && resource.secret_id == self.secret_id
            && resource.region == self.region
            && self.resource_types.contains(&resource.resource_type)
    }
}

//! portal.project — a catalog-managed or manually created project.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PortalError;
use crate::models::declaration::{CatalogLink, DeclarationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    Failed,
    Pending,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            "pending" => Ok(Self::Pending),
            other => Err(PortalError::Store(format!("unknown sync_status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub kind: DeclarationKind,
    pub description: String,
    pub owner_team_id: Uuid,
    /// `None` for manually created projects; those are never touched by catalog sync.
    pub catalog_file_path: Option<String>,
    pub catalog_metadata: Option<serde_json::Value>,
    pub links: Vec<CatalogLink>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub auto_synced: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn is_catalog_managed(&self) -> bool {
        self.catalog_file_path.is_some()
    }
}

/// Declared state written by one successful catalog sync of `catalog_file_path`.
#[derive(Debug, Clone)]
pub struct CatalogProjectUpsert {
    pub catalog_file_path: String,
    pub name: String,
    pub kind: DeclarationKind,
    pub description: String,
    pub owner_team_id: Uuid,
    pub catalog_metadata: serde_json::Value,
    pub links: Vec<CatalogLink>,
    pub synced_at: DateTime<Utc>,
}

/// A project created by hand through the API.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub owner_team_id: Uuid,
    #[serde(default)]
    pub kind: DeclarationKind,
}

/// Partial update. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub owner_team_id: Option<Uuid>,
}

impl ProjectPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.owner_team_id.is_none()
    }

    pub fn apply(&self, project: &mut Project) {
        if let Some(name) = &self.name {
            project.name = name.clone();
        }
        if let Some(description) = &self.description {
            project.description = description.clone();
        }
        if let Some(owner) = self.owner_team_id {
            project.owner_team_id = owner;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Project {
        let now = Utc::now();
        Project {
            id: Uuid::new_v4(),
            name: "billing".into(),
            kind: DeclarationKind::Service,
            description: "old".into(),
            owner_team_id: Uuid::new_v4(),
            catalog_file_path: None,
            catalog_metadata: None,
            links: Vec::new(),
            last_synced_at: None,
            sync_status: SyncStatus::Pending,
            sync_error: None,
            auto_synced: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut project = sample();
        let owner = project.owner_team_id;
        let patch = ProjectPatch {
            description: Some("new".into()),
            ..Default::default()
        };
        patch.apply(&mut project);
        assert_eq!(project.name, "billing");
        assert_eq!(project.description, "new");
        assert_eq!(project.owner_team_id, owner);
    }

    #[test]
    fn sync_status_round_trips_through_str() {
        for status in [SyncStatus::Synced, SyncStatus::Failed, SyncStatus::Pending] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("stale".parse::<SyncStatus>().is_err());
    }
}

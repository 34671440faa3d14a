//! Per-item outcome of one reconciliation pass. Never persisted.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// Catalog file path, or resource ARN.
    pub source: String,
    pub status: SyncOutcome,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

impl SyncResult {
    pub fn new(source: &str, status: SyncOutcome, message: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            status,
            message: message.into(),
            project_name: None,
        }
    }

    pub fn with_project(mut self, name: &str) -> Self {
        self.project_name = Some(name.to_string());
        self
    }
}

//! portal.audit_log — who did what, and how it turned out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub actor_email: String,
    pub action: String,
    pub resource_type: String,
    pub resource_name: String,
    pub status: String,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(actor_email: &str, action: &str, resource_type: &str, resource_name: &str) -> Self {
        Self {
            actor_email: actor_email.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
            status: "success".to_string(),
            details: serde_json::Value::Null,
        }
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub created_at: DateTime<Utc>,
}

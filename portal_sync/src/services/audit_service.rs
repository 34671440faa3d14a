//! Best-effort audit recording.

use crate::models::audit::AuditEntry;
use crate::store::AuditSink;

/// Record `entry`, logging instead of failing when the sink is unavailable.
pub async fn record_best_effort(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action.clone();
    let target = entry.resource_name.clone();
    if let Err(e) = sink.record(entry).await {
        tracing::warn!(action = %action, target = %target, "Audit write failed: {e}");
    }
}

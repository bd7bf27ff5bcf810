use serde_json::Value;
use sqlx::AnyPool;

use crate::db::{insert_audit_event, DbKind};

/// Appends an audit event. Failures are logged and swallowed.
pub async fn record_event(pool: &AnyPool, kind: DbKind, workspace_id: &str, action: &str, meta: Value) {
    if let Err(err) = insert_audit_event(pool, kind, workspace_id, action, &meta).await {
        tracing::warn!(
            workspace_id = %workspace_id,
            action = %action,
            error = %err,
            "audit write failed"
        );
    }
}

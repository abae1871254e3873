pub mod events;

use aigent_core::Metadata;
use sqlx::PgPool;
use uuid::Uuid;

pub use events::{AuditEvent, PolicyAction};

pub fn policy_event(
    action: PolicyAction,
    policy_id: Option<Uuid>,
    user_id: Option<Uuid>,
    context: Metadata,
) -> AuditEvent {
    AuditEvent::new(action, policy_id, user_id, context)
}

/// Persists an audit event to `policy_audit_log`. Best-effort: per §7
/// ("Audit logs are best-effort and never block the user path"), a failure
/// here is logged and swallowed rather than propagated, so callers never need
/// to special-case audit-log failure in their own error handling.
pub async fn record(pool: &PgPool, event: &AuditEvent) {
    let context_json = serde_json::to_value(&event.context).unwrap_or(serde_json::Value::Null);
    let result = sqlx::query(
        "INSERT INTO policy_audit_log (id, action, policy_id, user_id, context, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(event.id)
    .bind(event.action.as_str())
    .bind(event.policy_id)
    .bind(event.user_id)
    .bind(context_json)
    .bind(event.timestamp)
    .execute(pool)
    .await;

    if let Err(err) = result {
        tracing::warn!(error = %err, action = event.action.as_str(), "failed to persist audit event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_event_kind_and_details() {
        let evt = policy_event(PolicyAction::Validated, None, None, Metadata::new());
        assert_eq!(evt.action, PolicyAction::Validated);
    }
}

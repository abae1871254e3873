use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aigent_core::Metadata;

/// Actions the policy audit log records (grounded on the original
/// `policy_service.py::log_audit` call sites — validation, policy lifecycle,
/// and violation detection are the only things that call it today).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Validated,
    PolicyCreated,
    PolicyActivated,
    ViolationDetected,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Validated => "validated",
            PolicyAction::PolicyCreated => "policy_created",
            PolicyAction::PolicyActivated => "policy_activated",
            PolicyAction::ViolationDetected => "violation_detected",
        }
    }
}

/// A single append-only audit record. `policy_id`/`user_id` are optional
/// because not every audited action (e.g. a pre-auth content scan) has a
/// resolved policy or user yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: PolicyAction,
    pub policy_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub context: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: PolicyAction, policy_id: Option<Uuid>, user_id: Option<Uuid>, context: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            policy_id,
            user_id,
            context,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_and_details() {
        let evt = AuditEvent::new(PolicyAction::Validated, None, None, Metadata::new());
        assert_eq!(evt.action.as_str(), "validated");
    }

    #[test]
    fn timestamp_is_recent() {
        let before = Utc::now();
        let evt = AuditEvent::new(PolicyAction::PolicyCreated, None, None, Metadata::new());
        let after = Utc::now();
        assert!(evt.timestamp >= before && evt.timestamp <= after);
    }

    #[test]
    fn serde_roundtrip() {
        let evt = AuditEvent::new(PolicyAction::ViolationDetected, Some(Uuid::new_v4()), Some(Uuid::new_v4()), Metadata::new());
        let json = serde_json::to_string(&evt).unwrap();
        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action, evt.action);
        assert_eq!(back.policy_id, evt.policy_id);
    }
}

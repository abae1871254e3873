//! Policy Validator (C1): pattern-matches content for harm/unethical cues and
//! scores alignment between an interaction's input and output. Every other
//! component that needs a safety gate — chiefly the Reflection Worker — goes
//! through this crate rather than re-implementing pattern scanning.

mod patterns;
mod store;
mod validator;

use std::collections::HashMap;

use aigent_audit::{self, PolicyAction};
use aigent_config::PolicyConfig;
use aigent_core::{Metadata, Result};
use sqlx::PgPool;
use uuid::Uuid;

pub use store::Policy;
pub use validator::{AlignmentResult, ContentValidation, ValidationOutcome};

/// Thin facade binding the stateless scoring functions in `validator` to the
/// configured principle list and persistence pool, mirroring how the
/// original `PolicyService` wraps module-level functions in a class with
/// `self.db`/`self.settings`.
pub struct PolicyValidator {
    pool: PgPool,
    config: PolicyConfig,
}

impl PolicyValidator {
    pub fn new(pool: PgPool, config: PolicyConfig) -> Self {
        Self { pool, config }
    }

    pub fn validate_content(&self, content: &str) -> ContentValidation {
        validator::validate_content(content, &self.config.principles)
    }

    pub fn validate_alignment(
        &self,
        input: &str,
        output: &str,
        self_assessment: Option<&str>,
    ) -> AlignmentResult {
        validator::validate_alignment(
            input,
            output,
            self_assessment,
            &self.config.principles,
            self.config.alignment_threshold,
        )
    }

    pub async fn create_policy(&self, name: &str, content: serde_json::Value) -> Result<Policy> {
        let policy = store::create_policy(&self.pool, name, content).await?;
        self.log_audit(PolicyAction::PolicyCreated, Some(policy.id), None, Metadata::new())
            .await;
        Ok(policy)
    }

    pub async fn get_active_policies(&self) -> Result<Vec<Policy>> {
        store::get_active_policies(&self.pool).await
    }

    /// Best-effort append to `policy_audit_log` (§7: audit logs never block
    /// the user path — failures are logged inside `aigent_audit::record` and
    /// swallowed here too).
    pub async fn log_audit(
        &self,
        action: PolicyAction,
        policy_id: Option<Uuid>,
        user_id: Option<Uuid>,
        context: Metadata,
    ) {
        let event = aigent_audit::policy_event(action, policy_id, user_id, context);
        aigent_audit::record(&self.pool, &event).await;
    }
}

/// Exposed for callers (the Reflection Worker) that already hold principle
/// scores and just need the "aligned" boolean without constructing a full
/// `PolicyValidator`.
pub fn is_aligned(per_principle: &HashMap<String, f32>, threshold: f32) -> bool {
    if per_principle.is_empty() {
        return false;
    }
    per_principle.values().sum::<f32>() / per_principle.len() as f32 >= threshold
}

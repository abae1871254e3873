use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::Metadata;

/// One of the three memory tiers. Distinct storage substrates and TTL
/// policies hang off this: STM/ITM live in Redis (crate `aigent-memory`'s
/// tier store), LTM is permanent in Postgres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    Stm,
    Itm,
    Ltm,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Stm => "stm",
            MemoryTier::Itm => "itm",
            MemoryTier::Ltm => "ltm",
        }
    }
}

impl std::str::FromStr for MemoryTier {
    type Err = crate::AigentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stm" => Ok(MemoryTier::Stm),
            "itm" => Ok(MemoryTier::Itm),
            "ltm" => Ok(MemoryTier::Ltm),
            other => Err(crate::AigentError::invalid_input(format!(
                "unknown memory tier '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Lesson,
    Task,
    Conversation,
    Error,
    Reflection,
    Achievement,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Lesson => "lesson",
            MemoryType::Task => "task",
            MemoryType::Conversation => "conversation",
            MemoryType::Error => "error",
            MemoryType::Reflection => "reflection",
            MemoryType::Achievement => "achievement",
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = crate::AigentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lesson" => Ok(MemoryType::Lesson),
            "task" => Ok(MemoryType::Task),
            "conversation" => Ok(MemoryType::Conversation),
            "error" => Ok(MemoryType::Error),
            "reflection" => Ok(MemoryType::Reflection),
            "achievement" => Ok(MemoryType::Achievement),
            other => Err(crate::AigentError::invalid_input(format!(
                "unknown memory type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Neutral,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Neutral => "neutral",
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = crate::AigentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            "neutral" => Ok(Outcome::Neutral),
            other => Err(crate::AigentError::invalid_input(format!(
                "unknown outcome '{other}'"
            ))),
        }
    }
}

/// The core durable entity (§3). `vector_embedding` is nullable — C2 may fail
/// to produce one, and callers are required to tolerate that by storing the
/// memory anyway and letting `vector_search` skip it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: MemoryType,
    pub input_context: String,
    pub output_response: String,
    pub outcome: Outcome,
    pub emotional_weight: f32,
    pub confidence_score: f32,
    pub constitution_valid: bool,
    pub tags: Vec<String>,
    pub vector_embedding: Option<Vec<f32>>,
    pub tier: MemoryTier,
    pub access_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// `tier=ltm ⇔ expires_at=null` (§3 invariant, §8 universal property).
    pub fn tier_invariant_holds(&self) -> bool {
        (self.tier == MemoryTier::Ltm) == self.expires_at.is_none()
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

/// Partial update accepted by `Memory Engine::update` / `Relational Store::update`
/// (§4.6: "partial update of {outcome, emotional_weight, confidence_score, tags,
/// tier}"). `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryPatch {
    pub outcome: Option<Outcome>,
    pub emotional_weight: Option<f32>,
    pub confidence_score: Option<f32>,
    pub tags: Option<Vec<String>>,
    pub tier: Option<MemoryTier>,
}

/// A single interaction recorded in the STM ring buffer (§3 "STM buffer").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StmInteraction {
    pub input: String,
    pub output: String,
    pub timestamp: DateTime<Utc>,
    pub tokens: Option<i64>,
}

/// One member of the ITM sorted-set-by-access-count index (§3 "ITM index").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItmEntry {
    pub memory_id: Uuid,
    pub access_count: i64,
}

/// `resource_type` discriminant for `UsageLedgerEntry` (§3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    LlmTokens,
    Messages,
    MemoryStorage,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::LlmTokens => "llm_tokens",
            ResourceType::Messages => "messages",
            ResourceType::MemoryStorage => "memory_storage",
        }
    }
}

impl std::str::FromStr for ResourceType {
    type Err = crate::AigentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm_tokens" => Ok(ResourceType::LlmTokens),
            "messages" => Ok(ResourceType::Messages),
            "memory_storage" => Ok(ResourceType::MemoryStorage),
            other => Err(crate::AigentError::invalid_input(format!(
                "unknown resource type '{other}'"
            ))),
        }
    }
}

/// Subscription tier governing quota limits (§4.7 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountTier {
    FreeTrial,
    Basic,
    Pro,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub resource_type: ResourceType,
    pub amount: i64,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistilledKnowledge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_reflection_ids: Vec<Uuid>,
    pub topic: String,
    pub principle: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_invariant_detects_violation() {
        let mut m = sample_memory();
        m.tier = MemoryTier::Ltm;
        m.expires_at = None;
        assert!(m.tier_invariant_holds());

        m.expires_at = Some(Utc::now());
        assert!(!m.tier_invariant_holds());
    }

    #[test]
    fn roundtrips_tier_and_type_strings() {
        assert_eq!("ltm".parse::<MemoryTier>().unwrap(), MemoryTier::Ltm);
        assert_eq!("reflection".parse::<MemoryType>().unwrap(), MemoryType::Reflection);
        assert_eq!("success".parse::<Outcome>().unwrap(), Outcome::Success);
        assert!("bogus".parse::<MemoryTier>().is_err());
    }

    fn sample_memory() -> Memory {
        Memory {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_id: None,
            kind: MemoryType::Conversation,
            input_context: String::new(),
            output_response: String::new(),
            outcome: Outcome::Neutral,
            emotional_weight: 0.0,
            confidence_score: 0.5,
            constitution_valid: true,
            tags: vec![],
            vector_embedding: None,
            tier: MemoryTier::Stm,
            access_count: 0,
            last_accessed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: Some(Utc::now()),
        }
    }
}

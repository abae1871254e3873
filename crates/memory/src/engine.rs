//! Memory Engine (C8): the façade the Chat Coordinator and Distillation
//! Scheduler actually call. Orchestrates the Redis Tier Store, the
//! Relational Memory Store, the Usage Ledger, and the Embedding Service
//! behind one API, mirroring how `memory_service.py`'s endpoints are thin
//! wrappers that thread a `db: Session` through the lower-level services.

use aigent_config::MemoryConfig;
use aigent_core::{AigentError, Memory, MemoryPatch, MemoryTier, MemoryType, Outcome, Result, StmInteraction};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::redis_store::TierStore;
use crate::relational_store::{NewMemory, RelationalStore};
use crate::storage::estimate_memory_size;
use crate::usage_ledger::UsageLedger;

pub struct MemoryEngine {
    tiers: TierStore,
    relational: RelationalStore,
    ledger: UsageLedger,
    config: MemoryConfig,
}

/// Assembled prompt context (§4.8 `build_context`): last-5 STM interactions,
/// top-2 ITM memories (hydrated from Postgres, truncated to 200 chars),
/// top-5 LTM memories with `confidence_score > 0.7` (also truncated).
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub stm: Vec<StmInteraction>,
    pub itm: Vec<Memory>,
    pub ltm: Vec<Memory>,
}

const STM_CONTEXT_LIMIT: usize = 5;
const ITM_CONTEXT_LIMIT: usize = 2;
const LTM_CONTEXT_LIMIT: i64 = 5;
const CONTEXT_TRUNCATE_CHARS: usize = 200;
const LTM_MIN_CONFIDENCE: f32 = 0.7;

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

impl MemoryEngine {
    /// Opens the Postgres pool and the two Redis connections this engine
    /// needs, matching how the originals' `MemoryService`/`RedisClient` are
    /// constructed once at process start and then shared.
    pub async fn connect(config: MemoryConfig) -> Result<Self> {
        let pool = PgPool::connect(&config.database_url)
            .await
            .map_err(|e| AigentError::Fatal(format!("postgres connection failed: {e}")))?;
        let tiers = TierStore::connect(&config).await?;
        Ok(Self::new(pool, tiers, config))
    }

    pub fn new(pool: PgPool, tiers: TierStore, config: MemoryConfig) -> Self {
        Self { tiers, relational: RelationalStore::new(pool.clone()), ledger: UsageLedger::new(pool), config }
    }

    /// Stores a new memory in `tier`, computing its storage footprint,
    /// embedding it, and recording the byte cost in the usage ledger.
    /// Matches `MemoryService.store_memory`'s sequence (size → embed →
    /// insert → record usage), except storage-quota failures propagate
    /// rather than silently succeeding (DESIGN.md's Open Question decision).
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        user_id: Uuid,
        session_id: Option<Uuid>,
        kind: MemoryType,
        input_context: String,
        output_response: String,
        outcome: Outcome,
        emotional_weight: f32,
        confidence_score: f32,
        tags: Vec<String>,
        tier: MemoryTier,
    ) -> Result<Memory> {
        let size = estimate_memory_size(&input_context, &output_response, &tags, None, self.config.embedding_dimension);

        let combined_text = format!("{input_context} {output_response}");
        let embedding = aigent_embeddings::embed(&combined_text);
        if embedding.is_none() {
            tracing::warn!(%user_id, "failed to generate embedding, storing memory without a vector");
        }

        let memory = self
            .relational
            .insert(
                NewMemory {
                    user_id,
                    session_id,
                    kind,
                    input_context,
                    output_response,
                    outcome,
                    emotional_weight,
                    confidence_score,
                    tags,
                    tier,
                    vector_embedding: embedding,
                },
                self.config.stm_ttl_seconds,
                self.config.itm_ttl_seconds,
            )
            .await?;

        if let Err(e) = self
            .ledger
            .record(
                user_id,
                aigent_core::ResourceType::MemoryStorage,
                size,
                serde_json::json!({"memory_id": memory.id, "operation": "create", "tier": tier.as_str(), "type": kind.as_str()}),
            )
            .await
        {
            tracing::error!(%user_id, memory_id = %memory.id, error = %e, "failed to record storage usage");
        }

        if tier == MemoryTier::Itm {
            // §4.8 `store`: ITM upsert always seeds score = 1 for a freshly
            // created memory, regardless of `access_count` on the row just
            // returned (which is the row as written, before any read bumps it).
            self.tiers.itm_record(user_id, memory.id, 1).await?;
        }

        Ok(memory)
    }

    pub async fn get(&self, user_id: Uuid, memory_id: Uuid) -> Result<Option<Memory>> {
        self.relational.get(user_id, memory_id).await
    }

    pub async fn list(&self, user_id: Uuid, tier: Option<MemoryTier>, limit: i64, offset: i64) -> Result<Vec<Memory>> {
        self.relational.list(user_id, tier, limit, offset).await
    }

    pub async fn search(&self, user_id: Uuid, query_text: &str, tier: Option<MemoryTier>, min_confidence: Option<f32>, limit: i64) -> Result<Vec<(Memory, f32)>> {
        let Some(embedding) = aigent_embeddings::embed(query_text) else {
            tracing::warn!(%user_id, "failed to embed search query, returning no results");
            return Ok(Vec::new());
        };
        self.relational.vector_search(user_id, &embedding, tier, min_confidence, limit).await
    }

    pub async fn update(&self, user_id: Uuid, memory_id: Uuid, patch: MemoryPatch) -> Result<Option<Memory>> {
        self.relational.update(user_id, memory_id, patch, self.config.stm_ttl_seconds, self.config.itm_ttl_seconds).await
    }

    /// Promotes a memory to `target_tier`. Promoting into ITM registers it in
    /// the Redis access-count index; promoting out of ITM (to LTM) removes it
    /// from that index, matching `RedisClient.remove_from_itm`'s comment
    /// ("e.g., when promoted to LTM").
    pub async fn promote(&self, user_id: Uuid, memory_id: Uuid, target_tier: MemoryTier) -> Result<Option<Memory>> {
        let promoted = self.relational.promote(user_id, memory_id, target_tier, self.config.itm_ttl_seconds).await?;
        match (target_tier, &promoted) {
            (MemoryTier::Itm, Some(memory)) => self.tiers.itm_record(user_id, memory_id, memory.access_count).await?,
            (MemoryTier::Ltm, Some(_)) => self.tiers.itm_remove(user_id, memory_id).await?,
            _ => {}
        }
        Ok(promoted)
    }

    pub async fn delete(&self, user_id: Uuid, memory_id: Uuid) -> Result<bool> {
        let deleted = self.relational.soft_delete(user_id, memory_id).await?;
        if deleted {
            self.tiers.itm_remove(user_id, memory_id).await?;
        }
        Ok(deleted)
    }

    pub async fn stats(&self, user_id: Uuid) -> Result<Vec<(MemoryTier, i64, i64)>> {
        self.relational.stats(user_id).await
    }

    pub async fn stm_append(&self, user_id: Uuid, session_id: Uuid, input: String, output: String, tokens: Option<i64>) -> Result<()> {
        let _ = user_id;
        self.tiers
            .stm_append(session_id, StmInteraction { input, output, timestamp: Utc::now(), tokens })
            .await
    }

    pub async fn itm_touch(&self, user_id: Uuid, memory_id: Uuid) -> Result<()> {
        self.tiers.itm_increment(user_id, memory_id).await
    }

    pub async fn check_storage_quota(&self, user_id: Uuid, tier_limits: &aigent_config::TierLimits, additional_bytes: i64) -> Result<(bool, String)> {
        self.ledger
            .check_quota(user_id, tier_limits, aigent_core::ResourceType::MemoryStorage, additional_bytes)
            .await
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn relational(&self) -> &RelationalStore {
        &self.relational
    }

    pub fn tiers(&self) -> &TierStore {
        &self.tiers
    }

    /// Reflections created since `since`, across all users — the
    /// Distillation Scheduler's input (§4.10 step 1).
    pub async fn reflections_since(&self, since: chrono::DateTime<Utc>) -> Result<Vec<Memory>> {
        self.relational.list_reflections_since(since).await
    }

    /// Promotes every ITM memory that meets the promotion threshold,
    /// routing each through the regular `promote` path so the ITM index
    /// stays consistent (§4.10 step 4). Returns the promoted memories.
    pub async fn promote_eligible_itm(&self, threshold: i64) -> Result<Vec<Memory>> {
        let candidates = self.relational.list_itm_promotion_candidates(threshold).await?;
        let mut promoted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if let Some(memory) = self.promote(candidate.user_id, candidate.id, MemoryTier::Ltm).await? {
                promoted.push(memory);
            }
        }
        Ok(promoted)
    }

    /// Tombstone canonicalization sweep (§4.10 step 5). Returns the number
    /// of rows touched.
    pub async fn expire_stale(&self) -> Result<u64> {
        self.relational.expire_stale_non_ltm().await
    }

    pub async fn insert_distilled_knowledge(
        &self,
        user_id: Uuid,
        source_reflection_ids: Vec<Uuid>,
        topic: String,
        principle: String,
        confidence: f32,
    ) -> Result<aigent_core::DistilledKnowledge> {
        self.relational
            .insert_distilled_knowledge(user_id, source_reflection_ids, topic, principle, confidence)
            .await
    }

    /// Assembles the full prompt context for a chat turn (§4.8): last-5 STM,
    /// top-2 ITM (hydrated and truncated), and the 5 most recent LTM memories
    /// with `confidence_score > 0.7` (also truncated). LTM is ordered by
    /// recency, not semantic similarity to the turn — matching
    /// `memory.py::get_context`'s `list_memories(LTM, limit=5)` plus a
    /// confidence filter, and spec.md §4.8's "ordering ... is part of the
    /// contract" over a vector-search ordering that would make the context
    /// depend on the query text.
    pub async fn build_context(&self, user_id: Uuid, session_id: Uuid) -> Result<MemoryContext> {
        let stm = self.tiers.stm_get(session_id, Some(STM_CONTEXT_LIMIT)).await?;

        let itm_index = self.tiers.itm_top(user_id, ITM_CONTEXT_LIMIT).await?;
        let mut itm = Vec::with_capacity(itm_index.len());
        for entry in itm_index {
            if let Some(mut memory) = self.relational.get(user_id, entry.memory_id).await? {
                memory.input_context = truncate_chars(&memory.input_context, CONTEXT_TRUNCATE_CHARS);
                memory.output_response = truncate_chars(&memory.output_response, CONTEXT_TRUNCATE_CHARS);
                itm.push(memory);
            }
        }

        let ltm = self
            .relational
            .list(user_id, Some(MemoryTier::Ltm), LTM_CONTEXT_LIMIT, 0)
            .await?
            .into_iter()
            .filter(|memory| memory.confidence_score > LTM_MIN_CONFIDENCE)
            .map(|mut memory| {
                memory.input_context = truncate_chars(&memory.input_context, CONTEXT_TRUNCATE_CHARS);
                memory.output_response = truncate_chars(&memory.output_response, CONTEXT_TRUNCATE_CHARS);
                memory
            })
            .collect();

        Ok(MemoryContext { stm, itm, ltm })
    }
}

//! Relational Memory Store (C6): the single source of truth for every
//! `Memory` row regardless of tier. STM/ITM rows also live here (Redis only
//! holds the STM ring buffer and the ITM access-count index); promotion is a
//! `tier`/`expires_at` update, never a copy between stores.
//!
//! Grounded on `memory_service.py`. All statements are parameterized through
//! `sqlx`'s query builder — no string-interpolated SQL, unlike the original's
//! dynamic `update_memory` column assembly, which this re-expresses as a
//! fixed `MemoryPatch` (§4.6).

use aigent_core::{AigentError, Memory, MemoryPatch, MemoryTier, MemoryType, Outcome, Result};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

pub struct RelationalStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct MemoryRow {
    id: Uuid,
    user_id: Uuid,
    session_id: Option<Uuid>,
    kind: String,
    input_context: String,
    output_response: String,
    outcome: String,
    emotional_weight: f32,
    confidence_score: f32,
    constitution_valid: bool,
    tags: Vec<String>,
    tier: String,
    access_count: i64,
    last_accessed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<MemoryRow> for Memory {
    type Error = AigentError;

    fn try_from(row: MemoryRow) -> std::result::Result<Self, Self::Error> {
        Ok(Memory {
            id: row.id,
            user_id: row.user_id,
            session_id: row.session_id,
            kind: row.kind.parse::<MemoryType>()?,
            input_context: row.input_context,
            output_response: row.output_response,
            outcome: row.outcome.parse::<Outcome>()?,
            emotional_weight: row.emotional_weight,
            confidence_score: row.confidence_score,
            constitution_valid: row.constitution_valid,
            tags: row.tags,
            vector_embedding: None,
            tier: row.tier.parse::<MemoryTier>()?,
            access_count: row.access_count,
            last_accessed_at: row.last_accessed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, user_id, session_id, type as kind, input_context, output_response,
     outcome, emotional_weight, confidence_score, constitution_valid,
     tags, tier, access_count, last_accessed_at, created_at, updated_at, expires_at";

fn tier_expiry(tier: MemoryTier, now: DateTime<Utc>, stm_ttl: i64, itm_ttl: i64) -> Option<DateTime<Utc>> {
    match tier {
        MemoryTier::Stm => Some(now + chrono::Duration::seconds(stm_ttl)),
        MemoryTier::Itm => Some(now + chrono::Duration::seconds(itm_ttl)),
        MemoryTier::Ltm => None,
    }
}

#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub kind: MemoryType,
    pub input_context: String,
    pub output_response: String,
    pub outcome: Outcome,
    pub emotional_weight: f32,
    pub confidence_score: f32,
    pub tags: Vec<String>,
    pub tier: MemoryTier,
    pub vector_embedding: Option<Vec<f32>>,
}

impl RelationalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, new: NewMemory, stm_ttl_seconds: i64, itm_ttl_seconds: i64) -> Result<Memory> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = tier_expiry(new.tier, now, stm_ttl_seconds, itm_ttl_seconds);
        let embedding = new.vector_embedding.clone().map(Vector::from);

        sqlx::query(
            "INSERT INTO memories (
                id, user_id, session_id, type, input_context, output_response,
                outcome, emotional_weight, confidence_score, constitution_valid,
                tags, vector_embedding, tier, access_count, last_accessed_at,
                created_at, updated_at, expires_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, true, $10, $11, $12, 0, NULL, $13, $13, $14
            )",
        )
        .bind(id)
        .bind(new.user_id)
        .bind(new.session_id)
        .bind(new.kind.as_str())
        .bind(&new.input_context)
        .bind(&new.output_response)
        .bind(new.outcome.as_str())
        .bind(new.emotional_weight)
        .bind(new.confidence_score)
        .bind(&new.tags)
        .bind(embedding)
        .bind(new.tier.as_str())
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("insert memory failed: {e}")))?;

        self.fetch(new.user_id, id)
            .await?
            .ok_or_else(|| AigentError::transient("memory vanished immediately after insert"))
    }

    /// Fetches by ID without touching `access_count` — the internal primitive
    /// `insert`/`update`/`promote` use to read back the row they just wrote.
    /// Only `get` (a genuine user-facing read) counts as an access.
    async fn fetch(&self, user_id: Uuid, memory_id: Uuid) -> Result<Option<Memory>> {
        let row = sqlx::query_as::<_, MemoryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM memories
             WHERE id = $1 AND user_id = $2 AND (expires_at IS NULL OR expires_at > now())"
        ))
        .bind(memory_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("fetch memory failed: {e}")))?;

        row.map(Memory::try_from).transpose()
    }

    /// Fetches by ID and bumps `access_count`/`last_accessed_at`, matching
    /// `MemoryService.get_memory`'s `_increment_access` side effect.
    /// `constitution_valid = false` rows are still returned directly (Open
    /// Question 1): only `vector_search`/promotion filter on it.
    pub async fn get(&self, user_id: Uuid, memory_id: Uuid) -> Result<Option<Memory>> {
        let Some(memory) = self.fetch(user_id, memory_id).await? else { return Ok(None) };

        sqlx::query("UPDATE memories SET access_count = access_count + 1, last_accessed_at = now() WHERE id = $1")
            .bind(memory_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AigentError::transient(format!("bump access_count failed: {e}")))?;

        Ok(Some(memory))
    }

    pub async fn list(&self, user_id: Uuid, tier: Option<MemoryTier>, limit: i64, offset: i64) -> Result<Vec<Memory>> {
        let rows = if let Some(tier) = tier {
            sqlx::query_as::<_, MemoryRow>(&format!(
                "SELECT {SELECT_COLUMNS} FROM memories
                 WHERE user_id = $1 AND (expires_at IS NULL OR expires_at > now()) AND tier = $2
                 ORDER BY created_at DESC LIMIT $3 OFFSET $4"
            ))
            .bind(user_id)
            .bind(tier.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, MemoryRow>(&format!(
                "SELECT {SELECT_COLUMNS} FROM memories
                 WHERE user_id = $1 AND (expires_at IS NULL OR expires_at > now())
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
            ))
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AigentError::transient(format!("list memories failed: {e}")))?;

        rows.into_iter().map(Memory::try_from).collect()
    }

    /// Cosine-similarity search via pgvector's `<=>` operator, matching
    /// `MemoryService.search_memories`. Rows with a null embedding or
    /// `constitution_valid = false` are excluded (Open Question 1).
    pub async fn vector_search(
        &self,
        user_id: Uuid,
        query_embedding: &[f32],
        tier: Option<MemoryTier>,
        min_confidence: Option<f32>,
        limit: i64,
    ) -> Result<Vec<(Memory, f32)>> {
        let embedding = Vector::from(query_embedding.to_vec());

        #[derive(sqlx::FromRow)]
        struct Row {
            #[sqlx(flatten)]
            memory: MemoryRow,
            similarity: f64,
        }

        // Fixed parameter positions regardless of which filters are present,
        // using `$n::type IS NULL OR ...` so an absent filter never
        // participates in the WHERE clause.
        let sql = format!(
            "SELECT {SELECT_COLUMNS}, 1 - (vector_embedding <=> $1) as similarity
             FROM memories
             WHERE user_id = $2 AND (expires_at IS NULL OR expires_at > now())
               AND vector_embedding IS NOT NULL AND constitution_valid = true
               AND ($3::text IS NULL OR tier = $3)
               AND ($4::real IS NULL OR confidence_score >= $4)
             ORDER BY vector_embedding <=> $1
             LIMIT $5"
        );

        let rows = sqlx::query_as::<_, Row>(&sql)
            .bind(embedding)
            .bind(user_id)
            .bind(tier.map(|t| t.as_str()))
            .bind(min_confidence)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AigentError::transient(format!("vector search failed: {e}")))?;

        rows.into_iter()
            .map(|row| Ok((Memory::try_from(row.memory)?, row.similarity as f32)))
            .collect()
    }

    /// Partial update of `{outcome, emotional_weight, confidence_score, tags,
    /// tier}` (§4.6). `tier` changes recompute `expires_at` via `tier_expiry`.
    pub async fn update(&self, user_id: Uuid, memory_id: Uuid, patch: MemoryPatch, stm_ttl_seconds: i64, itm_ttl_seconds: i64) -> Result<Option<Memory>> {
        if let Some(outcome) = patch.outcome {
            sqlx::query("UPDATE memories SET outcome = $1, updated_at = now() WHERE id = $2 AND user_id = $3")
                .bind(outcome.as_str())
                .bind(memory_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| AigentError::transient(format!("update outcome failed: {e}")))?;
        }
        if let Some(weight) = patch.emotional_weight {
            sqlx::query("UPDATE memories SET emotional_weight = $1, updated_at = now() WHERE id = $2 AND user_id = $3")
                .bind(weight)
                .bind(memory_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| AigentError::transient(format!("update emotional_weight failed: {e}")))?;
        }
        if let Some(confidence) = patch.confidence_score {
            sqlx::query("UPDATE memories SET confidence_score = $1, updated_at = now() WHERE id = $2 AND user_id = $3")
                .bind(confidence)
                .bind(memory_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| AigentError::transient(format!("update confidence_score failed: {e}")))?;
        }
        if let Some(tags) = &patch.tags {
            sqlx::query("UPDATE memories SET tags = $1, updated_at = now() WHERE id = $2 AND user_id = $3")
                .bind(tags)
                .bind(memory_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| AigentError::transient(format!("update tags failed: {e}")))?;
        }
        if let Some(tier) = patch.tier {
            let expires_at = tier_expiry(tier, Utc::now(), stm_ttl_seconds, itm_ttl_seconds);
            sqlx::query("UPDATE memories SET tier = $1, expires_at = $2, updated_at = now() WHERE id = $3 AND user_id = $4")
                .bind(tier.as_str())
                .bind(expires_at)
                .bind(memory_id)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| AigentError::transient(format!("update tier failed: {e}")))?;
        }

        self.fetch(user_id, memory_id).await
    }

    /// Promotes to `target_tier`, recomputing `expires_at` (§4.8: ITM gets a
    /// fresh TTL, LTM gets none). Matches `MemoryService.promote_memory`.
    pub async fn promote(&self, user_id: Uuid, memory_id: Uuid, target_tier: MemoryTier, itm_ttl_seconds: i64) -> Result<Option<Memory>> {
        let expires_at = match target_tier {
            MemoryTier::Itm => Some(Utc::now() + chrono::Duration::seconds(itm_ttl_seconds)),
            MemoryTier::Ltm => None,
            MemoryTier::Stm => return Err(AigentError::invalid_input("cannot promote to stm")),
        };

        sqlx::query("UPDATE memories SET tier = $1, expires_at = $2, updated_at = now() WHERE id = $3 AND user_id = $4")
            .bind(target_tier.as_str())
            .bind(expires_at)
            .bind(memory_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AigentError::transient(format!("promote memory failed: {e}")))?;

        self.fetch(user_id, memory_id).await
    }

    /// Soft delete: sets `expires_at = now()`, matching `delete_memory`.
    pub async fn soft_delete(&self, user_id: Uuid, memory_id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE memories SET expires_at = now(), updated_at = now() WHERE id = $1 AND user_id = $2")
            .bind(memory_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AigentError::transient(format!("soft delete failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// All live `type=reflection` rows created in the trailing window,
    /// across every user — the Distillation Scheduler's input (§4.10 step 1).
    /// Unlike the rest of this store, this is not scoped to one `user_id`:
    /// the nightly job groups reflections per-user itself after fetching.
    pub async fn list_reflections_since(&self, since: DateTime<Utc>) -> Result<Vec<Memory>> {
        let rows = sqlx::query_as::<_, MemoryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM memories
             WHERE type = 'reflection' AND created_at >= $1
               AND (expires_at IS NULL OR expires_at > now())
             ORDER BY user_id, created_at"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("list reflections failed: {e}")))?;

        rows.into_iter().map(Memory::try_from).collect()
    }

    /// Rows eligible for the nightly ITM→LTM promotion sweep (§4.10 step 4):
    /// `tier=itm ∧ access_count ≥ threshold ∧ constitution_valid ∧ live`.
    pub async fn list_itm_promotion_candidates(&self, threshold: i64) -> Result<Vec<Memory>> {
        let rows = sqlx::query_as::<_, MemoryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM memories
             WHERE tier = 'itm' AND access_count >= $1 AND constitution_valid = true
               AND (expires_at IS NULL OR expires_at > now())"
        ))
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("list ITM promotion candidates failed: {e}")))?;

        rows.into_iter().map(Memory::try_from).collect()
    }

    /// Tombstone canonicalization (§4.10 step 5): any non-LTM row whose
    /// `expires_at` already lies in the past gets it reset to exactly `now()`.
    /// Already invisible to every live read; this only normalizes the value
    /// for tombstone counting. Returns the number of rows touched.
    pub async fn expire_stale_non_ltm(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE memories SET expires_at = now(), updated_at = now()
             WHERE tier <> 'ltm' AND expires_at IS NOT NULL AND expires_at < now()",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("expire stale sweep failed: {e}")))?;

        Ok(result.rows_affected())
    }

    /// Persists a new `DistilledKnowledge` row (§4.10 step 3). Immutable once
    /// written — there is no update/delete path, matching §3's "Immutable
    /// once written".
    pub async fn insert_distilled_knowledge(
        &self,
        user_id: Uuid,
        source_reflection_ids: Vec<Uuid>,
        topic: String,
        principle: String,
        confidence: f32,
    ) -> Result<aigent_core::DistilledKnowledge> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO distilled_knowledge (id, user_id, source_reflection_ids, topic, principle, confidence, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(id)
        .bind(user_id)
        .bind(&source_reflection_ids)
        .bind(&topic)
        .bind(&principle)
        .bind(confidence)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("insert distilled knowledge failed: {e}")))?;

        Ok(aigent_core::DistilledKnowledge {
            id,
            user_id,
            source_reflection_ids,
            topic,
            principle,
            confidence,
            created_at: now,
        })
    }

    /// Counts and byte totals per tier, matching `get_memory_stats`.
    pub async fn stats(&self, user_id: Uuid) -> Result<Vec<(MemoryTier, i64, i64)>> {
        #[derive(sqlx::FromRow)]
        struct StatRow {
            tier: String,
            count: i64,
            bytes: Option<i64>,
        }

        let rows: Vec<StatRow> = sqlx::query_as(
            "SELECT tier, COUNT(*) as count,
                    SUM(LENGTH(input_context) + COALESCE(LENGTH(output_response), 0))::bigint as bytes
             FROM memories
             WHERE user_id = $1 AND (expires_at IS NULL OR expires_at > now())
             GROUP BY tier",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("memory stats failed: {e}")))?;

        rows.into_iter()
            .map(|row| Ok((row.tier.parse::<MemoryTier>()?, row.count, row.bytes.unwrap_or(0))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_expiry_is_none_only_for_ltm() {
        let now = Utc::now();
        assert!(tier_expiry(MemoryTier::Ltm, now, 3600, 604_800).is_none());
        assert!(tier_expiry(MemoryTier::Stm, now, 3600, 604_800).is_some());
        assert!(tier_expiry(MemoryTier::Itm, now, 3600, 604_800).is_some());
    }
}

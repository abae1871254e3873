//! Redis Tier Store (C5): STM ring buffer + ITM access-count index.
//!
//! Grounded on `redis_client.py`. Two logical databases off one `redis_url`
//! (STM=db0, ITM=db1), matching `settings.redis_stm_db`/`redis_itm_db`. Only
//! the STM buffer and the ITM index live in Redis — the `Memory` rows
//! themselves (including ITM-tier ones) live in Postgres; see `RelationalStore`.

use aigent_config::MemoryConfig;
use aigent_core::{AigentError, ItmEntry, Result, StmInteraction};
use redis::aio::ConnectionManager;
use uuid::Uuid;

pub struct TierStore {
    stm: ConnectionManager,
    itm: ConnectionManager,
    stm_ttl_seconds: i64,
    stm_max_size: usize,
    itm_ttl_seconds: i64,
    itm_max_size: usize,
}

fn db_url(base: &str, db: i64) -> String {
    format!("{}/{}", base.trim_end_matches('/'), db)
}

impl TierStore {
    pub async fn connect(config: &MemoryConfig) -> Result<Self> {
        let stm_client = redis::Client::open(db_url(&config.redis_url, config.redis_stm_db))
            .map_err(|e| AigentError::Fatal(format!("invalid STM redis url: {e}")))?;
        let itm_client = redis::Client::open(db_url(&config.redis_url, config.redis_itm_db))
            .map_err(|e| AigentError::Fatal(format!("invalid ITM redis url: {e}")))?;

        let stm = stm_client
            .get_connection_manager()
            .await
            .map_err(|e| AigentError::Fatal(format!("STM redis connection failed: {e}")))?;
        let itm = itm_client
            .get_connection_manager()
            .await
            .map_err(|e| AigentError::Fatal(format!("ITM redis connection failed: {e}")))?;

        Ok(Self {
            stm,
            itm,
            stm_ttl_seconds: config.stm_ttl_seconds,
            stm_max_size: config.stm_max_size,
            itm_ttl_seconds: config.itm_ttl_seconds,
            itm_max_size: config.itm_max_size,
        })
    }

    fn stm_key(session_id: Uuid) -> String {
        format!("stm:{session_id}")
    }

    fn itm_key(user_id: Uuid) -> String {
        format!("itm:{user_id}")
    }

    /// Appends `interaction` to the session's ring buffer: get → append →
    /// truncate to `stm_max_size` (keep most recent) → `SETEX`, matching
    /// `RedisClient.store_stm`'s read-modify-write exactly.
    pub async fn stm_append(&self, session_id: Uuid, interaction: StmInteraction) -> Result<()> {
        let mut conn = self.stm.clone();
        let key = Self::stm_key(session_id);

        let existing: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("STM get failed: {e}")))?;

        let mut interactions: Vec<StmInteraction> = match existing {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        interactions.push(interaction);
        if interactions.len() > self.stm_max_size {
            let drop = interactions.len() - self.stm_max_size;
            interactions.drain(0..drop);
        }

        let payload = serde_json::to_string(&interactions)
            .map_err(|e| AigentError::transient(format!("STM serialize failed: {e}")))?;

        redis::cmd("SETEX")
            .arg(&key)
            .arg(self.stm_ttl_seconds)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("STM setex failed: {e}")))?;

        Ok(())
    }

    /// Returns up to the last `limit` interactions, most recent last. `None`
    /// limit returns the full buffer (spec.md's `get_stm` with no limit).
    pub async fn stm_get(&self, session_id: Uuid, limit: Option<usize>) -> Result<Vec<StmInteraction>> {
        let mut conn = self.stm.clone();
        let key = Self::stm_key(session_id);

        let raw: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("STM get failed: {e}")))?;

        let interactions: Vec<StmInteraction> = match raw {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => return Ok(Vec::new()),
        };

        match limit {
            Some(n) if n < interactions.len() => Ok(interactions[interactions.len() - n..].to_vec()),
            _ => Ok(interactions),
        }
    }

    pub async fn stm_clear(&self, session_id: Uuid) -> Result<()> {
        let mut conn = self.stm.clone();
        redis::cmd("DEL")
            .arg(Self::stm_key(session_id))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("STM delete failed: {e}")))?;
        Ok(())
    }

    /// Adds or refreshes a memory's access count in the user's ITM sorted
    /// set, refreshes the sliding-window TTL, and evicts the lowest-scored
    /// entries once the set exceeds `itm_max_size` — matching
    /// `RedisClient.store_itm`'s add-then-trim sequence.
    pub async fn itm_record(&self, user_id: Uuid, memory_id: Uuid, access_count: i64) -> Result<()> {
        let mut conn = self.itm.clone();
        let key = Self::itm_key(user_id);

        redis::cmd("ZADD")
            .arg(&key)
            .arg(access_count)
            .arg(memory_id.to_string())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("ITM zadd failed: {e}")))?;

        redis::cmd("EXPIRE")
            .arg(&key)
            .arg(self.itm_ttl_seconds)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("ITM expire failed: {e}")))?;

        let count: i64 = redis::cmd("ZCARD")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("ITM zcard failed: {e}")))?;

        if count as usize > self.itm_max_size {
            let to_remove = count as usize - self.itm_max_size;
            redis::cmd("ZREMRANGEBYRANK")
                .arg(&key)
                .arg(0)
                .arg(to_remove as i64 - 1)
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| AigentError::transient(format!("ITM trim failed: {e}")))?;
        }

        Ok(())
    }

    /// Increments a memory's access count by 1 and refreshes the TTL,
    /// matching `RedisClient.increment_itm_access`.
    pub async fn itm_increment(&self, user_id: Uuid, memory_id: Uuid) -> Result<()> {
        let mut conn = self.itm.clone();
        let key = Self::itm_key(user_id);

        redis::cmd("ZINCRBY")
            .arg(&key)
            .arg(1)
            .arg(memory_id.to_string())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("ITM zincrby failed: {e}")))?;

        redis::cmd("EXPIRE")
            .arg(&key)
            .arg(self.itm_ttl_seconds)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("ITM expire failed: {e}")))?;

        Ok(())
    }

    /// Top `limit` entries by access count, descending — `RedisClient.get_itm`.
    pub async fn itm_top(&self, user_id: Uuid, limit: usize) -> Result<Vec<ItmEntry>> {
        let mut conn = self.itm.clone();
        let key = Self::itm_key(user_id);

        let items: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
            .arg(&key)
            .arg(0)
            .arg(limit.saturating_sub(1) as i64)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("ITM zrevrange failed: {e}")))?;

        Ok(items
            .into_iter()
            .filter_map(|(id, score)| {
                Uuid::parse_str(&id).ok().map(|memory_id| ItmEntry { memory_id, access_count: score as i64 })
            })
            .collect())
    }

    /// Removes a memory from the ITM index — called on promotion to LTM.
    pub async fn itm_remove(&self, user_id: Uuid, memory_id: Uuid) -> Result<()> {
        let mut conn = self.itm.clone();
        redis::cmd("ZREM")
            .arg(Self::itm_key(user_id))
            .arg(memory_id.to_string())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("ITM zrem failed: {e}")))?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let mut stm = self.stm.clone();
        let mut itm = self.itm.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut stm)
            .await
            .map_err(|e| AigentError::transient(format!("STM ping failed: {e}")))?;
        redis::cmd("PING")
            .query_async::<String>(&mut itm)
            .await
            .map_err(|e| AigentError::transient(format!("ITM ping failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_url_appends_db_index() {
        assert_eq!(db_url("redis://127.0.0.1:6379", 0), "redis://127.0.0.1:6379/0");
        assert_eq!(db_url("redis://127.0.0.1:6379/", 1), "redis://127.0.0.1:6379/1");
    }
}

//! Redis Streams task queue for `reflect_on_interaction` (§6 Task queue,
//! SPEC_FULL.md §4.9/§6): at-least-once delivery via `XADD`/`XREADGROUP`/
//! `XACK`, plus an `XAUTOCLAIM` sweep that reclaims entries a worker picked
//! up but never acknowledged (crashed mid-processing).

use aigent_core::{AigentError, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload enqueued by the Chat Coordinator after every turn (§4.9 input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionTask {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub input_text: String,
    pub output_text: String,
    pub context: Option<serde_json::Value>,
}

/// One entry popped off the stream: its delivery id (needed to `XACK`) plus
/// the deserialized payload.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub task: ReflectionTask,
}

pub struct ReflectionQueue {
    conn: ConnectionManager,
    stream: String,
    group: String,
}

fn db_url(base: &str, db: i64) -> String {
    format!("{}/{}", base.trim_end_matches('/'), db)
}

impl ReflectionQueue {
    /// Opens its own Redis logical database (distinct from C5's STM/ITM
    /// databases, per §5 "no key collisions possible") and ensures the
    /// consumer group exists, creating the stream if needed.
    pub async fn connect(redis_url: &str, db: i64, stream: impl Into<String>, group: impl Into<String>) -> Result<Self> {
        let stream = stream.into();
        let group = group.into();

        let client = redis::Client::open(db_url(redis_url, db))
            .map_err(|e| AigentError::Fatal(format!("invalid reflection queue redis url: {e}")))?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(|e| AigentError::Fatal(format!("reflection queue redis connection failed: {e}")))?;

        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream)
            .arg(&group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        if let Err(err) = created {
            // BUSYGROUP means the group already exists — expected on every
            // restart after the first. Anything else is a real failure.
            if !err.to_string().contains("BUSYGROUP") {
                return Err(AigentError::Fatal(format!("XGROUP CREATE failed: {err}")));
            }
        }

        Ok(Self { conn, stream, group })
    }

    /// `XADD reflect:interactions * ...` — fire-and-forget from the caller's
    /// point of view; the worker drains it asynchronously.
    pub async fn enqueue(&self, task: &ReflectionTask) -> Result<String> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(task).map_err(|e| AigentError::transient(format!("serialize reflection task failed: {e}")))?;

        let id: String = conn
            .xadd(&self.stream, "*", &[("payload", payload)])
            .await
            .map_err(|e| AigentError::transient(format!("XADD failed: {e}")))?;
        Ok(id)
    }

    /// `XREADGROUP` for up to `count` new entries, blocking up to `block_ms`.
    pub async fn consume(&self, consumer: &str, count: usize, block_ms: usize) -> Result<Vec<Delivery>> {
        let mut conn = self.conn.clone();

        let opts = redis::streams::StreamReadOptions::default()
            .group(&self.group, consumer)
            .count(count)
            .block(block_ms);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[&self.stream], &[">"], &opts)
            .await
            .map_err(|e| AigentError::transient(format!("XREADGROUP failed: {e}")))?;

        let mut deliveries = Vec::new();
        for stream_key in reply.keys {
            for id in stream_key.ids {
                let Some(raw) = id.map.get("payload").and_then(|v| match v {
                    redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
                    _ => None,
                }) else {
                    continue;
                };
                match serde_json::from_str::<ReflectionTask>(&raw) {
                    Ok(task) => deliveries.push(Delivery { id: id.id, task }),
                    Err(err) => tracing::warn!(entry_id = %id.id, error = %err, "dropping malformed reflection task"),
                }
            }
        }
        Ok(deliveries)
    }

    pub async fn ack(&self, entry_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(&self.stream, &self.group, &[entry_id])
            .await
            .map_err(|e| AigentError::transient(format!("XACK failed: {e}")))?;
        Ok(())
    }

    /// Reclaims entries pending longer than `min_idle_ms` (delivered to a
    /// worker that crashed before acking), matching §6's "periodic `XCLAIM`
    /// sweep". Parsed by hand from the raw RESP reply — redis-rs has no
    /// typed wrapper for `XAUTOCLAIM`'s three-element `[cursor, entries,
    /// deleted_ids]` shape the way it does for `XREAD`.
    pub async fn reclaim_stale(&self, consumer: &str, min_idle_ms: i64) -> Result<Vec<Delivery>> {
        let mut conn = self.conn.clone();

        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg("0-0")
            .query_async(&mut conn)
            .await
            .map_err(|e| AigentError::transient(format!("XAUTOCLAIM failed: {e}")))?;

        let redis::Value::Array(top) = reply else {
            return Ok(Vec::new());
        };
        let Some(redis::Value::Array(entries)) = top.into_iter().nth(1) else {
            return Ok(Vec::new());
        };

        let mut deliveries = Vec::new();
        for entry in entries {
            let redis::Value::Array(parts) = entry else { continue };
            let mut parts = parts.into_iter();
            let Some(id_value) = parts.next() else { continue };
            let Some(redis::Value::Array(fields)) = parts.next() else { continue };

            let id = match id_value {
                redis::Value::BulkString(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                redis::Value::SimpleString(s) => s,
                _ => continue,
            };

            let mut payload = None;
            let mut field_iter = fields.into_iter();
            while let (Some(key), Some(value)) = (field_iter.next(), field_iter.next()) {
                let key = match key {
                    redis::Value::BulkString(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                    redis::Value::SimpleString(s) => s,
                    _ => continue,
                };
                if key == "payload" {
                    payload = match value {
                        redis::Value::BulkString(bytes) => String::from_utf8(bytes).ok(),
                        redis::Value::SimpleString(s) => Some(s),
                        _ => None,
                    };
                }
            }

            if let Some(raw) = payload {
                if let Ok(task) = serde_json::from_str::<ReflectionTask>(&raw) {
                    deliveries.push(Delivery { id, task });
                }
            }
        }
        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_url_appends_db_index() {
        assert_eq!(db_url("redis://127.0.0.1:6379", 2), "redis://127.0.0.1:6379/2");
        assert_eq!(db_url("redis://127.0.0.1:6379/", 2), "redis://127.0.0.1:6379/2");
    }

    #[test]
    fn task_serializes_round_trip() {
        let task = ReflectionTask {
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            input_text: "hi".to_string(),
            output_text: "hello".to_string(),
            context: None,
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: ReflectionTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id, task.user_id);
        assert_eq!(back.input_text, task.input_text);
    }
}

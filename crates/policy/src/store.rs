use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use aigent_core::{AigentError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub version: i32,
    pub name: String,
    pub content: serde_json::Value,
    pub is_active: bool,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

/// SHA-256 over the canonical (key-sorted) JSON form of `content`, so two
/// semantically identical payloads with differently-ordered keys sign the
/// same (§3 "Content is immutable by signature comparison").
fn sign(content: &serde_json::Value) -> String {
    let canonical = canonicalize(content);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

pub async fn create_policy(pool: &PgPool, name: &str, content: serde_json::Value) -> Result<Policy> {
    let signature = sign(&content);
    let row = sqlx::query_as::<_, (Uuid, i32, String, serde_json::Value, bool, String, DateTime<Utc>)>(
        "INSERT INTO policies (id, version, name, policy_content, is_active, signature, created_at)
         VALUES ($1, 1, $2, $3::jsonb, true, $4, now())
         RETURNING id, version, name, policy_content, is_active, signature, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(&content)
    .bind(&signature)
    .fetch_one(pool)
    .await
    .map_err(|e| AigentError::transient(format!("create_policy failed: {e}")))?;

    Ok(Policy {
        id: row.0,
        version: row.1,
        name: row.2,
        content: row.3,
        is_active: row.4,
        signature: row.5,
        created_at: row.6,
    })
}

pub async fn get_active_policies(pool: &PgPool) -> Result<Vec<Policy>> {
    let rows = sqlx::query_as::<_, (Uuid, i32, String, serde_json::Value, bool, String, DateTime<Utc>)>(
        "SELECT id, version, name, policy_content, is_active, signature, created_at
         FROM policies WHERE is_active = true ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| AigentError::transient(format!("get_active_policies failed: {e}")))?;

    Ok(rows
        .into_iter()
        .map(|row| Policy {
            id: row.0,
            version: row.1,
            name: row.2,
            content: row.3,
            is_active: row.4,
            signature: row.5,
            created_at: row.6,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_is_stable_under_key_reordering() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(sign(&a), sign(&b));
    }

    #[test]
    fn signature_changes_with_content() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert_ne!(sign(&a), sign(&b));
    }
}

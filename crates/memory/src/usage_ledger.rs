//! Usage Ledger (C7): append-only record of resource consumption, merged
//! from the originals' two separate `usage_service.py` modules (memory
//! storage bytes, and LLM tokens/messages) into spec.md's single
//! `UsageLedgerEntry`/`check_quota` abstraction parameterized by
//! `ResourceType`.

use aigent_config::TierLimits;
use aigent_core::{AccountTier, AigentError, Metadata, MetadataValue, ResourceType, Result, UsageLedgerEntry};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct UsageLedger {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    user_id: Uuid,
    resource_type: String,
    amount: i64,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

fn metadata_from_json(value: serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| metadata_value_from_json(v).map(|v| (k, v)))
            .collect(),
        _ => Metadata::new(),
    }
}

fn metadata_value_from_json(value: serde_json::Value) -> Option<MetadataValue> {
    match value {
        serde_json::Value::String(s) => Some(MetadataValue::String(s)),
        serde_json::Value::Number(n) => n.as_f64().map(MetadataValue::Number),
        serde_json::Value::Bool(b) => Some(MetadataValue::Bool(b)),
        serde_json::Value::Array(items) => {
            Some(MetadataValue::List(items.into_iter().filter_map(metadata_value_from_json).collect()))
        }
        serde_json::Value::Object(_) => Some(MetadataValue::Nested(
            match value {
                serde_json::Value::Object(map) => map
                    .into_iter()
                    .filter_map(|(k, v)| metadata_value_from_json(v).map(|v| (k, v)))
                    .collect(),
                _ => unreachable!(),
            },
        )),
        serde_json::Value::Null => None,
    }
}

impl TryFrom<LedgerRow> for UsageLedgerEntry {
    type Error = AigentError;

    fn try_from(row: LedgerRow) -> std::result::Result<Self, Self::Error> {
        Ok(UsageLedgerEntry {
            id: row.id,
            user_id: row.user_id,
            resource_type: row.resource_type.parse()?,
            amount: row.amount,
            metadata: metadata_from_json(row.metadata),
            timestamp: row.timestamp,
        })
    }
}

impl UsageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends a signed amount (negative for a deletion/refund), matching
    /// both originals' `record_usage`/`record_storage_usage`.
    pub async fn record(&self, user_id: Uuid, resource_type: ResourceType, amount: i64, metadata: serde_json::Value) -> Result<UsageLedgerEntry> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO usage_ledger (id, user_id, resource_type, amount, metadata, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(user_id)
        .bind(resource_type.as_str())
        .bind(amount)
        .bind(&metadata)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("record usage failed: {e}")))?;

        Ok(UsageLedgerEntry { id, user_id, resource_type, amount, metadata: metadata_from_json(metadata), timestamp: now })
    }

    /// Sum of `amount` for `resource_type` since the start of the current UTC
    /// day, matching `UsageService.get_today_usage`.
    pub async fn today(&self, user_id: Uuid, resource_type: ResourceType) -> Result<i64> {
        let today_start = Utc::now().date_naive().and_hms_opt(0, 0, 0).expect("valid midnight").and_utc();

        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM usage_ledger WHERE user_id = $1 AND resource_type = $2 AND timestamp >= $3",
        )
        .bind(user_id)
        .bind(resource_type.as_str())
        .bind(today_start)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("today usage query failed: {e}")))?;

        Ok(total.unwrap_or(0))
    }

    /// `(has_quota, message)`, matching `UsageService.check_quota`. A `-1`
    /// limit (`aigent_config::UNLIMITED`) always passes.
    pub async fn check_quota(&self, user_id: Uuid, tier_limits: &TierLimits, resource_type: ResourceType, requested_amount: i64) -> Result<(bool, String)> {
        let limit = match resource_type {
            ResourceType::LlmTokens => tier_limits.llm_tokens_per_day,
            ResourceType::Messages => tier_limits.messages_per_day,
            ResourceType::MemoryStorage => tier_limits.memory_storage_bytes,
        };

        if limit == aigent_config::UNLIMITED {
            return Ok((true, "unlimited quota".to_string()));
        }

        let used = self.today(user_id, resource_type).await?;
        if used + requested_amount > limit {
            return Ok((false, format!("daily quota exceeded: used {used}/{limit} {}", resource_type.as_str())));
        }

        Ok((true, format!("quota available: {}/{} {}", limit - used - requested_amount, limit, resource_type.as_str())))
    }

    /// Daily totals per resource type over the trailing `days`, matching
    /// `UsageService.get_usage_stats`.
    pub async fn range_stats(&self, user_id: Uuid, days: i64) -> Result<Vec<(ResourceType, chrono::NaiveDate, i64)>> {
        let start = Utc::now() - chrono::Duration::days(days);

        #[derive(sqlx::FromRow)]
        struct Row {
            resource_type: String,
            usage_date: chrono::NaiveDate,
            daily_total: i64,
        }

        let rows: Vec<Row> = sqlx::query_as(
            "SELECT resource_type, DATE(timestamp) as usage_date, SUM(amount) as daily_total
             FROM usage_ledger
             WHERE user_id = $1 AND timestamp >= $2
             GROUP BY resource_type, DATE(timestamp)
             ORDER BY usage_date DESC, resource_type",
        )
        .bind(user_id)
        .bind(start)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("usage stats query failed: {e}")))?;

        rows.into_iter()
            .map(|row| Ok((row.resource_type.parse::<ResourceType>()?, row.usage_date, row.daily_total)))
            .collect()
    }

    /// Total `memory_storage` bytes recorded for the user, feeding the
    /// storage-quota check that gates new memory writes (§4.7/§7: a read
    /// failure here fails the write loud, per DESIGN.md's Open Question
    /// decision — never fail-open the way the original's `check_storage_quota`
    /// does).
    pub async fn storage_usage(&self, user_id: Uuid) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(amount) FROM usage_ledger WHERE user_id = $1 AND resource_type = 'memory_storage'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AigentError::transient(format!("storage usage query failed: {e}")))?;

        Ok(total.unwrap_or(0))
    }

    pub fn account_tier_from_str(s: &str) -> Option<AccountTier> {
        match s {
            "free_trial" => Some(AccountTier::FreeTrial),
            "basic" => Some(AccountTier::Basic),
            "pro" => Some(AccountTier::Pro),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_tier_parses_known_strings() {
        assert_eq!(UsageLedger::account_tier_from_str("pro"), Some(AccountTier::Pro));
        assert_eq!(UsageLedger::account_tier_from_str("bogus"), None);
    }
}

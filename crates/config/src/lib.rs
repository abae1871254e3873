use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Provider identifiers used as keys into the per-provider timeout/priority
/// maps. Kept as plain strings (rather than an enum) so new providers can be
/// configured without a code change, matching the orchestrator's own
/// `provider_factories` pattern in the original service.
pub type ProviderName = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Priority-ordered provider names (§6 "provider priority (ordered list)").
    pub provider_priority: Vec<ProviderName>,
    /// Per-provider timeout override, in seconds.
    pub provider_timeouts_seconds: HashMap<ProviderName, u64>,
    pub cooldown_seconds: u64,
    pub retry_limit: u32,
    pub local_base_url: String,
    pub local_model: String,
    pub local_enabled: bool,
    pub hosted_base_url: String,
    pub hosted_model: String,
    pub hosted_api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut timeouts = HashMap::new();
        timeouts.insert("local".to_string(), 120);
        timeouts.insert("hosted".to_string(), 45);
        Self {
            provider_priority: vec!["local".to_string(), "hosted".to_string()],
            provider_timeouts_seconds: timeouts,
            cooldown_seconds: 60,
            retry_limit: 3,
            local_base_url: "http://localhost:11434".to_string(),
            local_model: "llama3.1:8b".to_string(),
            local_enabled: true,
            hosted_base_url: "https://openrouter.ai/api/v1".to_string(),
            hosted_model: "openai/gpt-4o-mini".to_string(),
            hosted_api_key_env: "OPENROUTER_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub stm_ttl_seconds: i64,
    pub stm_max_size: usize,
    pub itm_ttl_seconds: i64,
    pub itm_max_size: usize,
    pub promotion_threshold: i64,
    pub embedding_dimension: usize,
    pub redis_url: String,
    pub redis_stm_db: i64,
    pub redis_itm_db: i64,
    pub database_url: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            stm_ttl_seconds: 3600,
            stm_max_size: 20,
            itm_ttl_seconds: 604_800,
            itm_max_size: 100,
            promotion_threshold: 3,
            embedding_dimension: 384,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_stm_db: 0,
            redis_itm_db: 1,
            database_url: "postgres://localhost/aigent".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    pub llm_tokens_per_day: i64,
    pub messages_per_day: i64,
    pub memory_storage_bytes: i64,
}

/// Sentinel meaning "unlimited" for any quota dimension (§4.7).
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub free_trial: TierLimits,
    pub basic: TierLimits,
    pub pro: TierLimits,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_trial: TierLimits {
                llm_tokens_per_day: 1_000,
                messages_per_day: 100,
                memory_storage_bytes: 1 << 30,
            },
            basic: TierLimits {
                llm_tokens_per_day: 50_000,
                messages_per_day: 5_000,
                memory_storage_bytes: 10 * (1 << 30),
            },
            pro: TierLimits {
                llm_tokens_per_day: UNLIMITED,
                messages_per_day: UNLIMITED,
                memory_storage_bytes: UNLIMITED,
            },
        }
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            llm_tokens_per_day: 1_000,
            messages_per_day: 100,
            memory_storage_bytes: 1 << 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub principles: Vec<String>,
    pub alignment_threshold: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            principles: vec![
                "honesty".to_string(),
                "helpfulness".to_string(),
                "harmlessness".to_string(),
                "fairness".to_string(),
            ],
            alignment_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillationConfig {
    /// UTC hour (0-23) the nightly run fires at, plus one run at startup.
    pub schedule_hour_utc: u8,
    pub emotional_weight_threshold: f32,
    pub confidence_threshold: f32,
    pub min_group_size: usize,
    pub min_success_rate: f32,
}

impl Default for DistillationConfig {
    fn default() -> Self {
        Self {
            schedule_hour_utc: 2,
            emotional_weight_threshold: 0.3,
            confidence_threshold: 0.7,
            min_group_size: 2,
            min_success_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    pub max_retries: u32,
    pub stream_name: String,
    pub consumer_group: String,
    /// Logical Redis database for the task queue, distinct from
    /// `memory.redis_stm_db`/`memory.redis_itm_db` (§5 "no key collisions").
    pub redis_db: i64,
    pub consume_count: usize,
    pub consume_block_ms: usize,
    pub claim_min_idle_ms: i64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            stream_name: "reflect:interactions".to_string(),
            consumer_group: "reflection-workers".to_string(),
            redis_db: 2,
            consume_count: 10,
            consume_block_ms: 5_000,
            claim_min_idle_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub max_message_length: usize,
    pub expected_completion_tokens: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 10_000,
            expected_completion_tokens: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub quota: QuotaConfig,
    pub policy: PolicyConfig,
    pub distillation: DistillationConfig,
    pub reflection: ReflectionConfig,
    pub chat: ChatConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("DATABASE_URL") {
            if !value.is_empty() {
                config.memory.database_url = value;
            }
        }
        if let Ok(value) = env::var("REDIS_URL") {
            if !value.is_empty() {
                config.memory.redis_url = value;
            }
        }
        if let Ok(value) = env::var("OLLAMA_BASE_URL") {
            if !value.is_empty() {
                config.llm.local_base_url = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn tier_limits(&self, tier: aigent_core::AccountTier) -> &TierLimits {
        match tier {
            aigent_core::AccountTier::FreeTrial => &self.quota.free_trial,
            aigent_core::AccountTier::Basic => &self.quota.basic,
            aigent_core::AccountTier::Pro => &self.quota.pro,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_free_trial_limits_matching_spec() {
        let config = AppConfig::default();
        assert_eq!(config.quota.free_trial.llm_tokens_per_day, 1_000);
        assert_eq!(config.quota.free_trial.messages_per_day, 100);
        assert_eq!(config.quota.pro.llm_tokens_per_day, UNLIMITED);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = AppConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.toml");
        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.memory.stm_ttl_seconds, config.memory.stm_ttl_seconds);
    }

    #[test]
    fn load_from_missing_file_falls_back_to_defaults() {
        let loaded = AppConfig::load_from("/nonexistent/path/default.toml").unwrap();
        assert_eq!(loaded.memory.promotion_threshold, 3);
    }
}

//! LLM Provider Orchestrator (C4).
//!
//! Mirrors the original `LLMRouter`/`BaseLLMProvider` split: a priority-ordered
//! list of providers, each tracked with a failure count and a cooldown, tried
//! in order until one answers or the list is exhausted. `local` wraps an
//! Ollama-compatible HTTP endpoint; `hosted` wraps an OpenAI-compatible one
//! (OpenRouter by default) — grounded on `providers/local_ollama.py` and the
//! OpenAI-shaped hosted providers in the same package.

mod orchestrator;
mod providers;

pub use orchestrator::{Orchestrator, ProviderHealth};
pub use providers::{HostedProvider, LocalProvider};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a provider implementation can raise. Distinct from [`aigent_core::AigentError`]
/// because the orchestrator needs to distinguish "this provider is unusable
/// right now" (feeds the cooldown state machine) from a hard configuration
/// mistake the operator must fix before any provider will ever work.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("provider {0} is not configured: {1}")]
    Configuration(String, String),

    #[error("provider {0} timed out after {1}s")]
    Timeout(String, u64),

    #[error("provider {0} is not ready: {1}")]
    NotReady(String, String),

    #[error("provider {0} returned an error: {1}")]
    Provider(String, String),
}

impl ProviderError {
    pub fn provider_name(&self) -> &str {
        match self {
            Self::Configuration(name, _)
            | Self::Timeout(name, _)
            | Self::NotReady(name, _)
            | Self::Provider(name, _) => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, temperature: 0.7, max_tokens: None }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub provider: String,
    pub model: String,
    pub content: String,
    /// Wall-clock time the provider call took, stamped by the orchestrator
    /// once `generate` returns (§4.4: "return ... (provider, model, content,
    /// latency_ms)"). Providers themselves return `0` here; they don't know
    /// the orchestrator's view of elapsed time, only the call itself does.
    pub latency_ms: u64,
}

/// A chunk of a streamed response. `done` marks the terminal chunk (which may
/// also carry trailing content, mirroring Ollama's last-chunk-has-content
/// behavior).
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ProviderError>>;

/// A single LLM backend. Implementations own their own HTTP client and know
/// nothing about priority ordering, cooldowns, or fallback — that's the
/// orchestrator's job, mirroring how `BaseLLMProvider` subclasses only ever
/// implement `generate`/`is_available` against their own backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model_name(&self) -> &str;
    fn supports_streaming(&self) -> bool {
        true
    }
    fn timeout_seconds(&self) -> u64;

    /// Cheap local check (API key present, feature flag on) — no network call.
    fn is_configured(&self) -> bool;

    /// Network check that the backend is actually reachable right now.
    async fn check_health(&self) -> Result<(), ProviderError>;

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResult, ProviderError>;

    async fn stream(&self, request: &GenerateRequest) -> Result<ChunkStream, ProviderError>;
}

/// Builds the orchestrator's default two-provider stack (`local`, `hosted`)
/// straight from [`aigent_config::LlmConfig`], matching the original's
/// `provider_factories` wiring in `LLMRouter.__init__`.
pub fn orchestrator_from_config(config: &aigent_config::LlmConfig) -> Orchestrator {
    let local_timeout = config.provider_timeouts_seconds.get("local").copied().unwrap_or(120);
    let hosted_timeout = config.provider_timeouts_seconds.get("hosted").copied().unwrap_or(45);

    let local: std::sync::Arc<dyn LlmProvider> = std::sync::Arc::new(providers::LocalProvider::new(
        "local",
        config.local_base_url.clone(),
        config.local_model.clone(),
        config.local_enabled,
        local_timeout,
    ));
    let hosted: std::sync::Arc<dyn LlmProvider> = std::sync::Arc::new(providers::HostedProvider::new(
        "hosted",
        config.hosted_base_url.clone(),
        config.hosted_model.clone(),
        &config.hosted_api_key_env,
        hosted_timeout,
    ));

    Orchestrator::new(vec![local, hosted], config.provider_priority.clone(), config.retry_limit, config.cooldown_seconds)
}

//! Priority-ordered fallback with per-provider cooldown (§6 "LLM Provider
//! Orchestrator"), grounded on `llm_router.py`'s `LLMRouter.generate`: walk
//! providers in priority order, skip any in cooldown, try the first that's
//! both configured and healthy, record success/failure against its state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use aigent_core::{AigentError, Result};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::{ChunkStream, GenerateRequest, GenerateResult, LlmProvider, ProviderError, StreamChunk};

#[derive(Debug, Clone, Default)]
struct ProviderState {
    failure_count: u32,
    last_error: Option<String>,
    cooldown_until: Option<Instant>,
}

/// Point-in-time view of a provider's health, for operator surfaces (the CLI
/// health command) that shouldn't reach into the orchestrator's internals.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub name: String,
    pub configured: bool,
    pub failure_count: u32,
    pub in_cooldown: bool,
    pub last_error: Option<String>,
}

struct Entry {
    provider: Arc<dyn LlmProvider>,
    /// Shared (not just owned) so a streamed response's health bookkeeping —
    /// which outlives this function call inside a `'static` stream — can
    /// still reach the same state this entry's `generate` path mutates.
    state: Arc<StdMutex<ProviderState>>,
    /// Serializes any provider-specific lazy init so concurrent callers don't
    /// race to e.g. pull a model; the orchestrator itself never blocks on it
    /// except the caller currently initializing this provider.
    init_lock: AsyncMutex<()>,
}

pub struct Orchestrator {
    priority: Vec<String>,
    entries: HashMap<String, Entry>,
    retry_limit: u32,
    cooldown: Duration,
}

fn in_cooldown(state: &ProviderState) -> bool {
    state.cooldown_until.map(|until| Instant::now() < until).unwrap_or(false)
}

/// Shared by the non-streaming failure path and the streaming wrapper: a
/// failure is a failure regardless of whether it happened before the first
/// byte or mid-stream (§5 "Cooldown is not reset by stream errors that occur
/// before the first chunk — they count as a full failure").
fn apply_failure(state: &StdMutex<ProviderState>, retry_limit: u32, cooldown: Duration, provider_name: &str, err_display: &str) {
    let mut state = state.lock().expect("provider state mutex poisoned");
    state.failure_count += 1;
    state.last_error = Some(err_display.to_string());
    if state.failure_count >= retry_limit {
        state.cooldown_until = Some(Instant::now() + cooldown);
        warn!(provider = provider_name, failures = state.failure_count, "provider entering cooldown");
    }
}

fn apply_success(state: &StdMutex<ProviderState>) {
    let mut state = state.lock().expect("provider state mutex poisoned");
    state.failure_count = 0;
    state.last_error = None;
    state.cooldown_until = None;
}

impl Orchestrator {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, priority: Vec<String>, retry_limit: u32, cooldown_seconds: u64) -> Self {
        let mut entries = HashMap::new();
        for provider in providers {
            entries.insert(
                provider.name().to_string(),
                Entry { provider, state: Arc::new(StdMutex::new(ProviderState::default())), init_lock: AsyncMutex::new(()) },
            );
        }
        Self { priority, entries, retry_limit, cooldown: Duration::from_secs(cooldown_seconds) }
    }

    fn ordered_entries(&self) -> Vec<&Entry> {
        self.priority.iter().filter_map(|name| self.entries.get(name)).collect()
    }

    fn register_failure(&self, entry: &Entry, err: &ProviderError) {
        apply_failure(&entry.state, self.retry_limit, self.cooldown, entry.provider.name(), &err.to_string());
    }

    fn register_success(&self, entry: &Entry) {
        apply_success(&entry.state);
    }

    fn is_usable(&self, entry: &Entry) -> bool {
        if !entry.provider.is_configured() {
            return false;
        }
        let state = entry.state.lock().expect("provider state mutex poisoned");
        !in_cooldown(&state)
    }

    /// Runs `request` through providers in priority order, skipping any
    /// unconfigured or cooled-down, stopping at the first success. Raises
    /// `ProviderExhausted` if every candidate was skipped or failed —
    /// matching `LLMRouter.generate`'s `ProviderExhaustedError`.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResult> {
        let candidates = self.ordered_entries();
        if candidates.is_empty() {
            return Err(AigentError::ProviderExhausted("no providers configured".to_string()));
        }

        let mut last_err: Option<String> = None;
        for entry in candidates {
            if !self.is_usable(entry) {
                continue;
            }
            let _init = entry.init_lock.lock().await;
            let started = Instant::now();
            match entry.provider.generate(request).await {
                Ok(mut result) => {
                    result.latency_ms = started.elapsed().as_millis() as u64;
                    self.register_success(entry);
                    info!(provider = entry.provider.name(), latency_ms = result.latency_ms, "generate succeeded");
                    return Ok(result);
                }
                Err(err) => {
                    warn!(provider = entry.provider.name(), error = %err, "generate failed, trying next provider");
                    last_err = Some(err.to_string());
                    self.register_failure(entry, &err);
                }
            }
        }

        Err(AigentError::ProviderExhausted(
            last_err.unwrap_or_else(|| "all providers in cooldown or unconfigured".to_string()),
        ))
    }

    /// Streaming counterpart. The stream itself is returned lazily from the
    /// first usable provider that accepts the request; success/failure is
    /// only known once the stream is actually driven, so health bookkeeping
    /// happens as a wrapper around the returned stream rather than up front.
    pub async fn stream(&self, request: &GenerateRequest) -> Result<ChunkStream> {
        use futures::StreamExt;

        let candidates = self.ordered_entries();
        if candidates.is_empty() {
            return Err(AigentError::ProviderExhausted("no providers configured".to_string()));
        }

        let mut last_err: Option<String> = None;
        for entry in candidates {
            if !self.is_usable(entry) || !entry.provider.supports_streaming() {
                continue;
            }
            let _init = entry.init_lock.lock().await;
            let started = Instant::now();
            match entry.provider.stream(request).await {
                Ok(inner) => {
                    // Health bookkeeping for a streamed call can't happen here:
                    // success/failure is only known once the stream is driven,
                    // which happens after this function returns. `wrap_stream`
                    // holds a clone of this entry's shared state so a mid-stream
                    // error still reaches the same cooldown machinery a failed
                    // `generate` call does.
                    return Ok(wrap_stream(
                        inner,
                        entry.provider.name().to_string(),
                        entry.state.clone(),
                        self.retry_limit,
                        self.cooldown,
                        started,
                    )
                    .boxed());
                }
                Err(err) => {
                    warn!(provider = entry.provider.name(), error = %err, "stream init failed, trying next provider");
                    last_err = Some(err.to_string());
                    self.register_failure(entry, &err);
                }
            }
        }

        Err(AigentError::ProviderExhausted(
            last_err.unwrap_or_else(|| "all providers in cooldown or unconfigured".to_string()),
        ))
    }

    pub fn health_snapshot(&self) -> Vec<ProviderHealth> {
        self.priority
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| {
                let state = entry.state.lock().expect("provider state mutex poisoned");
                ProviderHealth {
                    name: entry.provider.name().to_string(),
                    configured: entry.provider.is_configured(),
                    failure_count: state.failure_count,
                    in_cooldown: in_cooldown(&state),
                    last_error: state.last_error.clone(),
                }
            })
            .collect()
    }

    /// Active health probe (distinct from the passive snapshot above): hits
    /// each configured provider's `check_health` and resets its failure state
    /// on success, mirroring the original health-check endpoint that doubles
    /// as a self-heal for providers that recovered before their cooldown
    /// expired.
    pub async fn probe_health(&self) -> Vec<ProviderHealth> {
        for entry in self.ordered_entries() {
            if !entry.provider.is_configured() {
                continue;
            }
            if entry.provider.check_health().await.is_ok() {
                self.register_success(entry);
            }
        }
        self.health_snapshot()
    }
}

/// Wraps a provider's raw chunk stream so the orchestrator's health state
/// reacts to what actually happens while the stream is driven, matching
/// §4.4(b)/(c): a mid-stream error marks the provider's failure state (and
/// may trip its cooldown) exactly like a failed `generate` call would, and a
/// stream that reaches its terminal chunk without error resets that state and
/// logs the observed latency, mirroring `generate`'s success path.
fn wrap_stream(
    inner: ChunkStream,
    provider_name: String,
    state: Arc<StdMutex<ProviderState>>,
    retry_limit: u32,
    cooldown: Duration,
    started: Instant,
) -> impl futures::Stream<Item = Result<StreamChunk, ProviderError>> {
    use futures::StreamExt;
    let mut failure_recorded = false;
    inner.map(move |item| {
        match &item {
            Ok(chunk) if chunk.done => {
                apply_success(&state);
                info!(provider = %provider_name, latency_ms = started.elapsed().as_millis() as u64, "stream completed");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(provider = %provider_name, error = %e, "stream chunk error");
                // Only the first error in a stream counts as the failure: a
                // producer that keeps yielding `Err` after its first one
                // (unusual, but not ruled out by the trait) must not inflate
                // `failure_count` past what one failed call would register.
                if !failure_recorded {
                    failure_recorded = true;
                    apply_failure(&state, retry_limit, cooldown, &provider_name, &e.to_string());
                }
            }
        }
        item
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubProvider {
        name: String,
        configured: bool,
        fail_times: AtomicU32,
        calls: AtomicU32,
        streaming: bool,
        stream_fails_mid_response: bool,
    }

    impl StubProvider {
        fn new(name: &str, configured: bool, fail_times: u32) -> Self {
            Self {
                name: name.to_string(),
                configured,
                fail_times: AtomicU32::new(fail_times),
                calls: AtomicU32::new(0),
                streaming: true,
                stream_fails_mid_response: false,
            }
        }

        fn without_streaming(name: &str, configured: bool) -> Self {
            Self {
                name: name.to_string(),
                configured,
                fail_times: AtomicU32::new(0),
                calls: AtomicU32::new(0),
                streaming: false,
                stream_fails_mid_response: false,
            }
        }

        fn failing_mid_stream(name: &str) -> Self {
            Self {
                name: name.to_string(),
                configured: true,
                fail_times: AtomicU32::new(0),
                calls: AtomicU32::new(0),
                streaming: true,
                stream_fails_mid_response: true,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }
        fn model_name(&self) -> &str {
            "stub-model"
        }
        fn supports_streaming(&self) -> bool {
            self.streaming
        }
        fn timeout_seconds(&self) -> u64 {
            5
        }
        fn is_configured(&self) -> bool {
            self.configured
        }
        async fn check_health(&self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn generate(&self, _request: &GenerateRequest) -> Result<GenerateResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(ProviderError::Provider(self.name.clone(), "stub failure".to_string()));
            }
            Ok(GenerateResult { provider: self.name.clone(), model: "stub-model".to_string(), content: "ok".to_string(), latency_ms: 0 })
        }
        async fn stream(&self, _request: &GenerateRequest) -> Result<ChunkStream, ProviderError> {
            use futures::StreamExt;
            if self.stream_fails_mid_response {
                return Ok(stream::iter(vec![
                    Ok(StreamChunk { content: "partial".to_string(), done: false }),
                    Err(ProviderError::Provider(self.name.clone(), "dropped mid-stream".to_string())),
                ])
                .boxed());
            }
            Ok(stream::iter(vec![Ok(StreamChunk { content: "ok".to_string(), done: true })]).boxed())
        }
    }

    fn req() -> GenerateRequest {
        GenerateRequest::new(vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn falls_back_to_second_provider_on_first_failure() {
        let local = Arc::new(StubProvider::new("local", true, 1));
        let hosted = Arc::new(StubProvider::new("hosted", true, 0));
        let orch = Orchestrator::new(
            vec![local.clone(), hosted.clone()],
            vec!["local".to_string(), "hosted".to_string()],
            3,
            60,
        );

        let result = orch.generate(&req()).await.unwrap();
        assert_eq!(result.provider, "hosted");
    }

    #[tokio::test]
    async fn enters_cooldown_after_retry_limit_failures_and_is_skipped() {
        let local = Arc::new(StubProvider::new("local", true, 100));
        let hosted = Arc::new(StubProvider::new("hosted", true, 0));
        let orch = Orchestrator::new(
            vec![local.clone(), hosted.clone()],
            vec!["local".to_string(), "hosted".to_string()],
            2,
            60,
        );

        // Drive `local` past its retry_limit so it enters cooldown.
        for _ in 0..2 {
            let _ = orch.generate(&req()).await;
        }
        let health = orch.health_snapshot();
        let local_health = health.iter().find(|h| h.name == "local").unwrap();
        assert!(local_health.in_cooldown);

        // A later call must skip straight to `hosted` without retrying `local`.
        let calls_before = local.calls.load(Ordering::SeqCst);
        let result = orch.generate(&req()).await.unwrap();
        assert_eq!(result.provider, "hosted");
        assert_eq!(local.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn empty_provider_list_is_exhausted_immediately() {
        let orch = Orchestrator::new(vec![], vec![], 3, 60);
        let err = orch.generate(&req()).await.unwrap_err();
        assert!(matches!(err, AigentError::ProviderExhausted(_)));
    }

    #[tokio::test]
    async fn all_providers_in_cooldown_is_exhausted_without_calling_any() {
        let local = Arc::new(StubProvider::new("local", true, 100));
        let orch = Orchestrator::new(vec![local.clone()], vec!["local".to_string()], 1, 60);

        let _ = orch.generate(&req()).await;
        let calls_before = local.calls.load(Ordering::SeqCst);
        let err = orch.generate(&req()).await.unwrap_err();
        assert!(matches!(err, AigentError::ProviderExhausted(_)));
        assert_eq!(local.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let local = Arc::new(StubProvider::new("local", true, 1));
        let orch = Orchestrator::new(vec![local.clone()], vec!["local".to_string()], 5, 60);

        // First call fails once internally then the orchestrator has no
        // fallback, so it reports exhausted; the second call succeeds and
        // must reset failure_count to 0.
        let _ = orch.generate(&req()).await;
        let _ = orch.generate(&req()).await;
        let health = orch.health_snapshot();
        assert_eq!(health[0].failure_count, 0);
    }

    #[tokio::test]
    async fn unconfigured_provider_is_skipped() {
        let local = Arc::new(StubProvider::new("local", false, 0));
        let hosted = Arc::new(StubProvider::new("hosted", true, 0));
        let orch = Orchestrator::new(
            vec![local.clone(), hosted.clone()],
            vec!["local".to_string(), "hosted".to_string()],
            3,
            60,
        );
        let result = orch.generate(&req()).await.unwrap();
        assert_eq!(result.provider, "hosted");
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_skips_a_provider_that_does_not_support_streaming() {
        let local = Arc::new(StubProvider::without_streaming("local", true));
        let hosted = Arc::new(StubProvider::new("hosted", true, 0));
        let orch = Orchestrator::new(
            vec![local.clone(), hosted.clone()],
            vec!["local".to_string(), "hosted".to_string()],
            3,
            60,
        );

        let mut stream = orch.stream(&req()).await.unwrap();
        use futures::StreamExt;
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.content, "ok");
        // `local` was never called for the generate path either, confirming
        // the orchestrator picked `hosted` directly.
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mid_stream_error_registers_as_a_provider_failure() {
        let local = Arc::new(StubProvider::failing_mid_stream("local"));
        let orch = Orchestrator::new(vec![local.clone()], vec!["local".to_string()], 5, 60);

        use futures::StreamExt;
        let mut stream = orch.stream(&req()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content, "partial");
        let second = stream.next().await.unwrap();
        assert!(second.is_err());

        let health = orch.health_snapshot();
        assert_eq!(health[0].failure_count, 1);
        assert!(health[0].last_error.is_some());
    }

    #[tokio::test]
    async fn cooldown_triggers_after_retry_limit_mid_stream_failures() {
        let local = Arc::new(StubProvider::failing_mid_stream("local"));
        let orch = Orchestrator::new(vec![local.clone()], vec!["local".to_string()], 1, 60);

        use futures::StreamExt;
        let mut stream = orch.stream(&req()).await.unwrap();
        while stream.next().await.is_some() {}

        let health = orch.health_snapshot();
        assert!(health[0].in_cooldown);
    }
}

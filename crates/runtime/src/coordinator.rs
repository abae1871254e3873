//! Chat Coordinator (C11): per-request glue binding the orchestrator, the
//! memory engine, the usage ledger, and the reflection queue into the single
//! user-turn sequence spec.md §4.11 lays out. Grounded on the teacher's
//! `respond_and_remember_stream` for the overall shape (persist → build
//! context → call LLM → persist reply) though none of its prompt-assembly
//! details (beliefs/identity/tool blocks) apply here.

use aigent_config::AppConfig;
use aigent_core::{AccountTier, AigentError, MemoryTier, MemoryType, Outcome, Result};
use aigent_llm::{ChatMessage, GenerateRequest, Orchestrator};
use aigent_memory::MemoryEngine;
use aigent_reflection::{ReflectionQueue, ReflectionTask};
use uuid::Uuid;

/// The sanitized, length-checked user turn plus identity the caller already
/// resolved (auth is out of scope per spec.md §1 — the coordinator trusts
/// its caller for `user_id`/`account_tier`).
pub struct ChatTurnRequest {
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub account_tier: AccountTier,
    pub message: String,
}

pub struct ChatTurnResponse {
    pub session_id: Uuid,
    pub reply: String,
    pub provider: String,
    pub tokens_used: i64,
}

pub struct ChatCoordinator {
    orchestrator: Orchestrator,
    memory: MemoryEngine,
    reflection_queue: ReflectionQueue,
    config: AppConfig,
}

/// Strips markup and enforces the max message length (§4.11 step 1),
/// re-expressed with `ammonia` rather than hand-rolled regex stripping per
/// SPEC_FULL.md §4.11.
fn sanitize(raw: &str, max_len: usize) -> Result<String> {
    let cleaned = ammonia::clean(raw.trim());
    if cleaned.is_empty() {
        return Err(AigentError::invalid_input("message is empty after sanitization"));
    }
    if cleaned.chars().count() > max_len {
        return Err(AigentError::invalid_input(format!("message exceeds max length of {max_len} characters")));
    }
    Ok(cleaned)
}

impl ChatCoordinator {
    pub fn new(orchestrator: Orchestrator, memory: MemoryEngine, reflection_queue: ReflectionQueue, config: AppConfig) -> Self {
        Self { orchestrator, memory, reflection_queue, config }
    }

    /// `C4.ensure_ready` (§4.11 step 3): at least one provider must be
    /// configured and out of cooldown, else the caller should surface a 503.
    pub fn ensure_ready(&self) -> Result<()> {
        let ready = self.orchestrator.health_snapshot().into_iter().any(|h| h.configured && !h.in_cooldown);
        if ready {
            Ok(())
        } else {
            Err(AigentError::ProviderNotReady("no LLM provider is configured and healthy".to_string()))
        }
    }

    /// Runs the full per-turn sequence (§4.11 steps 1-9). Reflection enqueue
    /// failures are logged and swallowed, never surfaced to the caller
    /// (step 9: "Enqueue failures MUST NOT fail the user-visible response").
    pub async fn handle_turn(&self, request: ChatTurnRequest) -> Result<ChatTurnResponse> {
        let clean_message = sanitize(&request.message, self.config.chat.max_message_length)?;
        let session_id = request.session_id.unwrap_or_else(Uuid::new_v4);

        self.ensure_ready()?;

        let context = self.memory.build_context(request.user_id, session_id).await?;

        let mut messages = Vec::new();
        for ltm in &context.ltm {
            messages.push(ChatMessage::system(format!("Known principle: {}", ltm.output_response)));
        }
        for itm in &context.itm {
            messages.push(ChatMessage::system(format!("Relevant memory: {}", itm.output_response)));
        }
        for turn in &context.stm {
            messages.push(ChatMessage::user(turn.input.clone()));
            messages.push(ChatMessage::assistant(turn.output.clone()));
        }
        messages.push(ChatMessage::user(clean_message.clone()));

        let prompt_tokens = aigent_embeddings::count_conversation(messages.iter().map(|m| (m.role.as_str(), m.content.as_str())));
        let estimated_tokens = prompt_tokens as i64 + self.config.chat.expected_completion_tokens;

        let tier_limits = self.config.tier_limits(request.account_tier);
        let (has_token_quota, token_message) = self.memory.ledger().check_quota(request.user_id, tier_limits, aigent_core::ResourceType::LlmTokens, estimated_tokens).await?;
        if !has_token_quota {
            return Err(AigentError::quota_exceeded(token_message));
        }
        let (has_message_quota, message_quota_message) = self.memory.ledger().check_quota(request.user_id, tier_limits, aigent_core::ResourceType::Messages, 1).await?;
        if !has_message_quota {
            return Err(AigentError::quota_exceeded(message_quota_message));
        }

        let generate_request = GenerateRequest::new(messages);
        let result = self.orchestrator.generate(&generate_request).await?;

        let actual_tokens = aigent_embeddings::count(&clean_message) as i64 + aigent_embeddings::count(&result.content) as i64;

        self.memory
            .store(
                request.user_id,
                Some(session_id),
                MemoryType::Conversation,
                clean_message.clone(),
                result.content.clone(),
                Outcome::Success,
                0.0,
                1.0,
                vec!["conversation".to_string()],
                MemoryTier::Stm,
            )
            .await?;
        self.memory.stm_append(request.user_id, session_id, clean_message.clone(), result.content.clone(), Some(actual_tokens)).await?;

        if let Err(err) = self
            .memory
            .ledger()
            .record(request.user_id, aigent_core::ResourceType::LlmTokens, actual_tokens, serde_json::json!({"provider": result.provider}))
            .await
        {
            tracing::error!(user_id = %request.user_id, error = %err, "failed to record llm_tokens usage");
        }
        if let Err(err) = self.memory.ledger().record(request.user_id, aigent_core::ResourceType::Messages, 1, serde_json::json!({})).await {
            tracing::error!(user_id = %request.user_id, error = %err, "failed to record messages usage");
        }

        let reflection_task = ReflectionTask {
            user_id: request.user_id,
            session_id,
            input_text: clean_message,
            output_text: result.content.clone(),
            context: None,
        };
        if let Err(err) = self.reflection_queue.enqueue(&reflection_task).await {
            tracing::warn!(user_id = %request.user_id, %session_id, error = %err, "failed to enqueue reflection task");
        }

        Ok(ChatTurnResponse { session_id, reply: result.content, provider: result.provider, tokens_used: actual_tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_markup_and_trims() {
        let clean = sanitize("  <script>alert(1)</script>hello  ", 100).unwrap();
        assert_eq!(clean, "hello");
    }

    #[test]
    fn sanitize_rejects_messages_over_max_length() {
        let long = "a".repeat(20);
        assert!(sanitize(&long, 10).is_err());
    }

    #[test]
    fn sanitize_rejects_empty_after_cleaning() {
        assert!(sanitize("   ", 100).is_err());
        assert!(sanitize("<div></div>", 100).is_err());
    }
}

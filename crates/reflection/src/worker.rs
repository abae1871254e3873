//! Reflection Worker (C9): drains the task queue, runs the three-question
//! self-assessment against the Policy Validator, and persists the result as
//! a `type=reflection` LTM memory (§4.9).

use std::time::Duration;

use aigent_config::ReflectionConfig;
use aigent_core::{MemoryTier, MemoryType, Outcome};
use aigent_memory::MemoryEngine;
use aigent_policy::PolicyValidator;
use uuid::Uuid;

use crate::assessment::{compose_self_assessment, improvement_notes};
use crate::queue::{Delivery, ReflectionQueue, ReflectionTask};

const ALIGNMENT_SUCCESS_THRESHOLD: f32 = 0.7;

pub struct ReflectionWorker {
    queue: ReflectionQueue,
    engine: MemoryEngine,
    policy: PolicyValidator,
    config: ReflectionConfig,
    consumer: String,
}

impl ReflectionWorker {
    pub fn new(queue: ReflectionQueue, engine: MemoryEngine, policy: PolicyValidator, config: ReflectionConfig, consumer: impl Into<String>) -> Self {
        Self { queue, engine, policy, config, consumer: consumer.into() }
    }

    /// Runs forever, alternating a normal consume pass with a stale-entry
    /// reclaim sweep, matching §6's "periodic XCLAIM sweep" alongside the
    /// regular `XREADGROUP` loop.
    pub async fn run(&self) -> ! {
        loop {
            match self.queue.consume(&self.consumer, self.config.consume_count, self.config.consume_block_ms).await {
                Ok(deliveries) => {
                    for delivery in deliveries {
                        self.handle(delivery).await;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "reflection queue consume failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }

            match self.queue.reclaim_stale(&self.consumer, self.config.claim_min_idle_ms).await {
                Ok(reclaimed) => {
                    for delivery in reclaimed {
                        self.handle(delivery).await;
                    }
                }
                Err(err) => tracing::error!(error = %err, "reflection queue reclaim failed"),
            }
        }
    }

    /// Processes one delivery with retry-with-backoff (§4.9 step 4: up to
    /// `max_retries` attempts, `2^attempt` seconds apart), acking on success
    /// and on exhaustion alike — at-least-once delivery tolerates duplicates,
    /// but a task that can never succeed must not wedge the stream forever.
    async fn handle(&self, delivery: Delivery) {
        let mut attempt = 0;
        loop {
            match self.process(&delivery.task).await {
                Ok(()) => {
                    if let Err(err) = self.queue.ack(&delivery.id).await {
                        tracing::error!(entry_id = %delivery.id, error = %err, "failed to ack reflection task");
                    }
                    return;
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.max_retries {
                        tracing::warn!(
                            entry_id = %delivery.id,
                            user_id = %delivery.task.user_id,
                            error = %err,
                            attempts = attempt,
                            "reflection task failed after max retries, dropping"
                        );
                        if let Err(ack_err) = self.queue.ack(&delivery.id).await {
                            tracing::error!(entry_id = %delivery.id, error = %ack_err, "failed to ack exhausted reflection task");
                        }
                        return;
                    }
                    let backoff = Duration::from_secs(2u64.pow(attempt));
                    tracing::warn!(entry_id = %delivery.id, attempt, error = %err, "reflection task failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn process(&self, task: &ReflectionTask) -> aigent_core::Result<()> {
        let alignment = self.policy.validate_alignment(&task.input_text, &task.output_text, None);
        let self_assessment = compose_self_assessment(&task.input_text, &task.output_text, &alignment);
        let notes = improvement_notes(&alignment);

        let outcome = if alignment.alignment_score >= ALIGNMENT_SUCCESS_THRESHOLD {
            Outcome::Success
        } else {
            Outcome::Neutral
        };

        let mut tags = vec!["reflection".to_string(), "self-assessment".to_string(), "alignment".to_string()];
        if !notes.is_empty() {
            tags.push("has-improvement-notes".to_string());
        }

        self.engine
            .store(
                task.user_id,
                Some(task.session_id),
                MemoryType::Reflection,
                "Reflection on interaction".to_string(),
                self_assessment,
                outcome,
                0.0,
                alignment.alignment_score,
                tags,
                MemoryTier::Ltm,
            )
            .await?;

        Ok(())
    }
}

/// Convenience constructor used by `crates/runtime` to obtain a random,
/// stable-for-the-process consumer name (the stream's consumer group
/// requires distinct names for parallel workers to share load correctly).
pub fn consumer_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_name_is_prefixed_and_unique() {
        let a = consumer_name("worker");
        let b = consumer_name("worker");
        assert!(a.starts_with("worker-"));
        assert_ne!(a, b);
    }

    #[test]
    fn success_threshold_matches_alignment_threshold() {
        assert_eq!(ALIGNMENT_SUCCESS_THRESHOLD, 0.7);
    }
}

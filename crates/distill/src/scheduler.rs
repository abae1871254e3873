//! Nightly Distillation Worker (C10): a single-instance scheduled job that
//! extracts durable principles out of the day's reflections, sweeps eligible
//! ITM memories into LTM, and canonicalizes expired tombstones (§4.10).

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aigent_config::DistillationConfig;
use aigent_core::Result;
use aigent_memory::MemoryEngine;
use chrono::{Duration as ChronoDuration, Utc};
use cron::Schedule;

use crate::groups::group_reflections;

/// Outcome of one distillation run, logged at `info` and useful for an
/// operator-facing `distill run` CLI subcommand to print.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DistillationSummary {
    pub reflections_processed: usize,
    pub knowledge_distilled: usize,
    pub memories_promoted: usize,
    pub memories_expired: u64,
    pub errors: Vec<String>,
}

pub struct DistillationScheduler {
    engine: Arc<MemoryEngine>,
    config: DistillationConfig,
    promotion_threshold: i64,
    running: AtomicBool,
}

impl DistillationScheduler {
    pub fn new(engine: Arc<MemoryEngine>, config: DistillationConfig, promotion_threshold: i64) -> Self {
        Self { engine, config, promotion_threshold, running: AtomicBool::new(false) }
    }

    /// Builds the cron expression for "once a day at `schedule_hour_utc`:00
    /// UTC" — `sec min hour day month dow year`, matching the `cron` crate's
    /// seven-field format.
    fn schedule(&self) -> Result<Schedule> {
        let expr = format!("0 0 {} * * * *", self.config.schedule_hour_utc);
        Schedule::from_str(&expr).map_err(|e| aigent_core::AigentError::Fatal(format!("invalid distillation cron expression: {e}")))
    }

    /// Runs once at startup, then blocks forever firing at each scheduled
    /// occurrence. A single-instance guard (`running`) prevents a slow run
    /// from overlapping with the next tick landing while it is still going.
    pub async fn run_forever(&self) {
        self.run_guarded().await;

        let schedule = match self.schedule() {
            Ok(schedule) => schedule,
            Err(err) => {
                tracing::error!(error = %err, "distillation scheduler cannot start: invalid schedule");
                return;
            }
        };

        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                tracing::error!("distillation cron schedule produced no upcoming occurrence");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(std::time::Duration::from_secs(60));
            tokio::time::sleep(wait).await;
            self.run_guarded().await;
        }
    }

    async fn run_guarded(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("distillation run already in progress, skipping this tick");
            return;
        }
        let summary = self.run_once().await;
        self.running.store(false, Ordering::SeqCst);

        tracing::info!(
            reflections_processed = summary.reflections_processed,
            knowledge_distilled = summary.knowledge_distilled,
            memories_promoted = summary.memories_promoted,
            memories_expired = summary.memories_expired,
            error_count = summary.errors.len(),
            "distillation run complete"
        );
    }

    /// The full nightly algorithm (§4.10 steps 1-5). A single group's failure
    /// is recorded in `errors` and does not abort the remaining groups or the
    /// promotion/expiry sweeps that follow, mirroring the per-batch error
    /// isolation the agent runtime's sleep cycle already uses.
    pub async fn run_once(&self) -> DistillationSummary {
        let mut summary = DistillationSummary::default();

        let since = Utc::now() - ChronoDuration::hours(24);
        let reflections = match self.engine.reflections_since(since).await {
            Ok(reflections) => reflections,
            Err(err) => {
                summary.errors.push(format!("failed to fetch reflections: {err}"));
                return summary;
            }
        };
        summary.reflections_processed = reflections.len();

        let groups = group_reflections(reflections, self.config.min_group_size);
        for group in groups {
            if !group.meets_criterion(self.config.emotional_weight_threshold, self.config.confidence_threshold, self.config.min_success_rate) {
                continue;
            }

            let principle = group.extract_principle();
            let confidence = group.avg_confidence();
            let result = self
                .engine
                .insert_distilled_knowledge(group.user_id, group.source_reflection_ids(), group.topic.clone(), principle, confidence)
                .await;

            match result {
                Ok(_) => summary.knowledge_distilled += 1,
                Err(err) => summary.errors.push(format!("group {}/{}: {err}", group.user_id, group.topic)),
            }
        }

        match self.engine.promote_eligible_itm(self.promotion_threshold).await {
            Ok(promoted) => summary.memories_promoted = promoted.len(),
            Err(err) => summary.errors.push(format!("ITM promotion sweep failed: {err}")),
        }

        match self.engine.expire_stale().await {
            Ok(expired) => summary.memories_expired = expired,
            Err(err) => summary.errors.push(format!("expiry sweep failed: {err}")),
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_expression_parses_for_every_hour() {
        for hour in 0..24u8 {
            let config = DistillationConfig { schedule_hour_utc: hour, ..DistillationConfig::default() };
            let expr = format!("0 0 {hour} * * * *");
            assert!(Schedule::from_str(&expr).is_ok());
        }
    }
}

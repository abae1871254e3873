use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use aigent_config::AppConfig;
use aigent_core::AccountTier;
use aigent_distill::DistillationScheduler;
use aigent_llm::orchestrator_from_config;
use aigent_memory::MemoryEngine;
use aigent_reflection::{consumer_name, ReflectionQueue, ReflectionWorker};
use aigent_runtime::{ChatCoordinator, ChatTurnRequest};

const DEFAULT_CONFIG_PATH: &str = "aigent.toml";

#[derive(Debug, Parser)]
#[command(name = "aigent", version, about = "Cognitive AI backend operator CLI")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Probe every configured LLM provider and print a health snapshot.
    Health,
    /// Print per-tier memory counts for a user.
    MemoryStats {
        #[arg(long)]
        user_id: Uuid,
    },
    /// Run the nightly distillation pass once and print the summary.
    Distill,
    /// Run the distillation scheduler forever (one run now, then on schedule).
    DistillDaemon,
    /// Run the reflection worker forever, draining the task queue.
    ReflectDaemon,
    /// Send a single chat turn through the coordinator and print the reply.
    Chat {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        session_id: Option<Uuid>,
        #[arg(long, default_value = "free_trial")]
        tier: String,
        message: String,
    },
}

async fn load_config(path: &str) -> Result<AppConfig> {
    AppConfig::load_from(path).context("failed to load configuration")
}

async fn memory_engine(config: &AppConfig) -> Result<MemoryEngine> {
    MemoryEngine::connect(config.memory.clone())
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect memory engine: {e}"))
}

async fn reflection_queue(config: &AppConfig) -> Result<ReflectionQueue> {
    ReflectionQueue::connect(&config.memory.redis_url, config.reflection.redis_db, &config.reflection.stream_name, &config.reflection.consumer_group)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect reflection queue: {e}"))
}

fn account_tier_from_str(s: &str) -> Result<AccountTier> {
    aigent_memory::UsageLedger::account_tier_from_str(s).context("unknown account tier, expected one of: free_trial, basic, pro")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Health => {
            let orchestrator = orchestrator_from_config(&config.llm);
            let snapshot = orchestrator.probe_health().await;
            for provider in snapshot {
                println!(
                    "{:<10} configured={:<5} in_cooldown={:<5} failures={:<3} last_error={}",
                    provider.name,
                    provider.configured,
                    provider.in_cooldown,
                    provider.failure_count,
                    provider.last_error.unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Commands::MemoryStats { user_id } => {
            let engine = memory_engine(&config).await?;
            let stats = engine.stats(user_id).await.map_err(|e| anyhow::anyhow!("{e}"))?;
            for (tier, count, total_bytes) in stats {
                println!("{:<4} count={:<6} bytes={total_bytes}", tier.as_str(), count);
            }
        }
        Commands::Distill => {
            let engine = Arc::new(memory_engine(&config).await?);
            let scheduler = DistillationScheduler::new(engine, config.distillation.clone(), config.memory.promotion_threshold);
            let summary = scheduler.run_once().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::DistillDaemon => {
            let engine = Arc::new(memory_engine(&config).await?);
            let scheduler = DistillationScheduler::new(engine, config.distillation.clone(), config.memory.promotion_threshold);
            scheduler.run_forever().await;
        }
        Commands::ReflectDaemon => {
            let engine = memory_engine(&config).await?;
            let queue = reflection_queue(&config).await?;
            let pool = sqlx::PgPool::connect(&config.memory.database_url).await.context("failed to connect to postgres for policy validator")?;
            let policy = aigent_policy::PolicyValidator::new(pool, config.policy.clone());
            let worker = ReflectionWorker::new(queue, engine, policy, config.reflection.clone(), consumer_name("cli-reflect"));
            worker.run().await;
        }
        Commands::Chat { user_id, session_id, tier, message } => {
            let orchestrator = orchestrator_from_config(&config.llm);
            let engine = memory_engine(&config).await?;
            let queue = reflection_queue(&config).await?;
            let coordinator = ChatCoordinator::new(orchestrator, engine, queue, config.clone());

            let response = coordinator
                .handle_turn(ChatTurnRequest { user_id, session_id, account_tier: account_tier_from_str(&tier)?, message })
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;

            println!("session={} provider={} tokens={}", response.session_id, response.provider, response.tokens_used);
            println!("{}", response.reply);
        }
    }

    Ok(())
}

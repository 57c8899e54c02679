//! Task-service replica consumer.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::sync::Arc;
use tracing::info;
use trellis_core::config::{ServiceConfig, ServiceKind};
use trellis_core::replica::replica_handlers;
use trellis_core::router::EventRouter;
use trellis_redis::{init_pool, RedisReplicaStore, RedisStreamBroker};

#[derive(Subcommand)]
pub enum ReplicaCommands {
    /// Consume user-events and board-events into the local replicas
    Run {
        /// Consumer name inside the task-service group
        #[arg(long, env = "TRELLIS_CONSUMER")]
        consumer: Option<String>,
    },

    /// List replica ids of one kind
    List {
        /// "boards" or "users"
        kind: String,
    },
}

pub async fn execute(cmd: ReplicaCommands, config: ServiceConfig) -> Result<()> {
    match cmd {
        ReplicaCommands::Run { consumer } => run(consumer, config).await,
        ReplicaCommands::List { kind } => list(&kind, config).await,
    }
}

async fn run(consumer: Option<String>, mut config: ServiceConfig) -> Result<()> {
    if consumer.is_some() {
        config.consumer = consumer;
    }
    let broker = RedisStreamBroker::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?
        .with_maxlen(config.stream_maxlen);
    let store = Arc::new(RedisReplicaStore::new(broker.pool().clone()));

    let consumer = config.consumer_name(ServiceKind::Tasks);
    let router = EventRouter::for_service(
        Arc::new(broker),
        ServiceKind::Tasks,
        consumer.clone(),
        replica_handlers(store),
    )
    .with_retry(config.retry);

    println!(
        "{} Consuming {} as {} ({})",
        "●".cyan(),
        ServiceKind::Tasks.topics().join(", ").bold(),
        consumer,
        ServiceKind::Tasks.group()
    );
    println!("  {}", "Ctrl+C to stop".dimmed());

    let stats = router.run(super::shutdown_on_ctrl_c()).await?;
    info!(?stats, "Replica consumer stopped");
    println!(
        "{} {} handled, {} ignored, {} failed",
        "✓".green(),
        stats.dispatched,
        stats.ignored,
        stats.failed
    );
    Ok(())
}

async fn list(kind: &str, config: ServiceConfig) -> Result<()> {
    let kind = match kind {
        "boards" | "board" => "board",
        "users" | "user" => "user",
        other => bail!("Unknown replica kind '{}', expected boards or users", other),
    };
    let pool = init_pool(&config.redis_url).await?;
    let ids = RedisReplicaStore::new(pool).list_ids(kind).await?;

    if ids.is_empty() {
        println!("{}", format!("No {} replicas.", kind).dimmed());
        return Ok(());
    }
    for id in &ids {
        println!("{}", id);
    }
    println!("{}", format!("{} {} replica(s)", ids.len(), kind).dimmed());
    Ok(())
}

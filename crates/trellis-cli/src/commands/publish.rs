//! Publish command.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trellis_core::config::ServiceConfig;
use trellis_core::publisher::{Publisher, PublisherConfig};
use trellis_core::Envelope;
use trellis_redis::RedisStreamBroker;

#[derive(Args)]
pub struct PublishArgs {
    /// Topic, e.g. board-events
    pub topic: String,

    /// Key selecting the handler, e.g. new-board
    pub key: String,

    /// JSON payload, e.g. '{"id":"abc123"}'
    pub payload: String,

    /// Queue the envelope and exit without waiting for the broker's offset
    #[arg(long)]
    pub detach: bool,
}

pub async fn execute(args: PublishArgs, config: ServiceConfig) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).context("Payload is not valid JSON")?;

    let broker = RedisStreamBroker::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?
        .with_maxlen(config.stream_maxlen);
    let (publisher, worker) = Publisher::new(
        Arc::new(broker),
        PublisherConfig {
            timeout: config.publish_timeout,
            queue: config.publish_queue,
        },
    );

    if args.detach {
        let outcome = publisher.publish(&args.topic, &args.key, &payload);
        drop(publisher);
        // The worker stops on its own once the only handle is gone.
        let stats = worker.run(CancellationToken::new()).await;
        if outcome.is_queued() && stats.failed == 0 {
            println!("{} Queued {}/{}", "✓".green(), args.topic, args.key);
        } else {
            println!("{} Event for {}/{} was dropped", "✗".red(), args.topic, args.key);
        }
        return Ok(());
    }

    let envelope = Envelope::json(&args.topic, &args.key, &payload)?;
    let offset = publisher.publish_now(&envelope).await?;
    println!(
        "{} Published {}/{} at {}",
        "✓".green(),
        args.topic,
        args.key,
        offset.dimmed()
    );
    Ok(())
}

//! Topic administration commands.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use trellis_core::config::ServiceConfig;
use trellis_redis::{admin, init_pool};

#[derive(Subcommand)]
pub enum TopicCommands {
    /// Create every topic stream and the consumer groups reading it
    Create,

    /// Delete a topic stream with all of its entries
    Clean {
        /// Topic to delete, e.g. board-events
        topic: String,
    },
}

pub async fn execute(cmd: TopicCommands, config: ServiceConfig) -> Result<()> {
    let pool = init_pool(&config.redis_url).await?;

    match cmd {
        TopicCommands::Create => {
            for tg in admin::create_topics(&pool).await? {
                let mark = if tg.created {
                    "created".green()
                } else {
                    "exists".dimmed()
                };
                println!("{:<16} {:<22} {}", tg.topic, tg.group, mark);
            }
        }
        TopicCommands::Clean { topic } => {
            if admin::clean_topic(&pool, &topic).await? {
                println!("{} Deleted topic {}", "✓".green(), topic.bold());
            } else {
                println!("{}", format!("Topic {} does not exist.", topic).dimmed());
            }
        }
    }
    Ok(())
}

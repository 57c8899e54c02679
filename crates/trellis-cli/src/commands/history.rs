//! History command: stored notifications for one user.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use trellis_core::config::ServiceConfig;
use trellis_core::notification::NotificationStore;
use trellis_redis::{init_pool, RedisNotificationStore};

#[derive(Args)]
pub struct HistoryArgs {
    /// User whose notifications to list
    pub user_id: String,

    /// Show at most this many
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

pub async fn execute(args: HistoryArgs, config: ServiceConfig) -> Result<()> {
    let pool = init_pool(&config.redis_url).await?;
    let store = RedisNotificationStore::new(pool);
    let rows = store.list_for_user(&args.user_id).await?;

    if rows.is_empty() {
        println!("{}", "No notifications found.".dimmed());
        return Ok(());
    }
    for n in rows.iter().take(args.limit) {
        println!(
            "{}  {}",
            n.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            n.message
        );
    }
    if rows.len() > args.limit {
        println!("{}", format!("... {} more", rows.len() - args.limit).dimmed());
    }
    Ok(())
}

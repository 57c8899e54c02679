//! Notify command: post to a running gateway.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use trellis_core::config::ServiceConfig;
use trellis_core::notifier::NotifyClient;

#[derive(Args)]
pub struct NotifyArgs {
    /// Recipient user id
    pub user_id: String,

    /// Notification text
    pub message: String,

    /// Gateway base URL
    #[arg(long, env = "TRELLIS_NOTIFY_URL")]
    pub url: Option<String>,
}

pub async fn execute(args: NotifyArgs, config: ServiceConfig) -> Result<()> {
    let url = args.url.unwrap_or(config.notify_url);
    let client = NotifyClient::with_url(&url);

    let ack = client.send(&args.user_id, &args.message).await?;
    println!("{} {}", "✓".green(), ack.message);
    Ok(())
}

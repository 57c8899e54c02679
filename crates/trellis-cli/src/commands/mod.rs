//! CLI command definitions and handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use trellis_core::config::ServiceConfig;

pub mod history;
pub mod notifications;
pub mod notify;
pub mod publish;
pub mod replicas;
pub mod topics;

/// Trellis - event propagation and live notifications for Trellis boards
#[derive(Parser)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Redis URL used for the broker and the stores
    #[arg(long, global = true, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the notification service: gateway, hub and task-events consumer
    Notifications(notifications::NotificationsArgs),

    /// Task-service replicas of users and boards
    #[command(subcommand)]
    Replicas(replicas::ReplicaCommands),

    /// Publish one envelope
    Publish(publish::PublishArgs),

    /// Topic administration
    #[command(subcommand)]
    Topics(topics::TopicCommands),

    /// Send a notification through a running gateway
    Notify(notify::NotifyArgs),

    /// List a user's stored notifications, newest first
    History(history::HistoryArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let mut config = ServiceConfig::from_env();
        if let Some(url) = self.redis_url {
            config.redis_url = url;
        }

        match self.command {
            Commands::Notifications(args) => notifications::execute(args, config).await,
            Commands::Replicas(cmd) => replicas::execute(cmd, config).await,
            Commands::Publish(args) => publish::execute(args, config).await,
            Commands::Topics(cmd) => topics::execute(cmd, config).await,
            Commands::Notify(args) => notify::execute(args, config).await,
            Commands::History(args) => history::execute(args, config).await,
        }
    }
}

/// Token cancelled on the first Ctrl+C.
pub(crate) fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                trigger.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Could not listen for Ctrl+C"),
        }
    });
    token
}

//! Notification service command.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use trellis_core::config::{ServiceConfig, ServiceKind};
use trellis_core::hub::{FanoutHub, HubConfig};
use trellis_core::notification::{notification_handlers, NotificationDispatcher};
use trellis_core::router::EventRouter;
use trellis_redis::{RedisNotificationStore, RedisStreamBroker};
use trellis_web::state::AppState;

#[derive(Args)]
pub struct NotificationsArgs {
    /// Port to listen on
    #[arg(long, default_value = "8080")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Consumer name inside the notification-service group
    #[arg(long, env = "TRELLIS_CONSUMER")]
    pub consumer: Option<String>,
}

pub async fn execute(args: NotificationsArgs, mut config: ServiceConfig) -> Result<()> {
    if args.consumer.is_some() {
        config.consumer = args.consumer;
    }
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;

    let broker = RedisStreamBroker::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?
        .with_maxlen(config.stream_maxlen);
    let store = Arc::new(RedisNotificationStore::new(broker.pool().clone()));

    let (hub, hub_worker) = FanoutHub::new(HubConfig {
        queue: config.hub_queue,
        write_timeout: config.ws_write_timeout,
    });
    let dispatcher = NotificationDispatcher::new(store).with_hub(hub.clone());

    let consumer = config.consumer_name(ServiceKind::Notifications);
    let router = EventRouter::for_service(
        Arc::new(broker),
        ServiceKind::Notifications,
        consumer.clone(),
        notification_handlers(dispatcher.clone()),
    )
    .with_retry(config.retry);

    println!();
    println!("  {} {}", "Trellis".cyan().bold(), "Notification Service".bold());
    println!();
    println!("  {}     http://{}/notify", "Notify".green(), addr);
    println!("  {}  ws://{}/ws", "WebSocket".green(), addr);
    println!("  {}     http://{}/health", "Health".green(), addr);
    println!("  {}   {} ({})", "Consumer".green(), consumer, ServiceKind::Notifications.group());
    println!();
    println!("  {}", "Ctrl+C to stop".dimmed());
    println!();

    let shutdown = super::shutdown_on_ctrl_c();
    let hub_task = tokio::spawn(hub_worker.run(shutdown.child_token()));

    // A dead router takes the whole service down with it.
    let router_shutdown = shutdown.clone();
    let router_task = tokio::spawn(async move {
        let result = router.run(router_shutdown.child_token()).await;
        if let Err(e) = &result {
            error!(error = %e, "Event router terminated");
            router_shutdown.cancel();
        }
        result
    });

    let served = trellis_web::run_server(AppState::new(dispatcher, hub), addr, shutdown.clone()).await;
    shutdown.cancel();

    let routed = router_task.await.context("Event router task panicked")?;
    hub_task.await.context("Hub task panicked")?;
    served?;

    let stats = routed?;
    info!(?stats, "Notification service stopped");
    Ok(())
}

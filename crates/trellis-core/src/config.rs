//! Service identities and runtime configuration.

use std::time::Duration;

use crate::envelope::topics;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_NOTIFY_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_PUBLISH_QUEUE: usize = 1_024;
pub const DEFAULT_HUB_QUEUE: usize = 256;
pub const DEFAULT_WS_WRITE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_ROUTER_MAX_RETRIES: u32 = 5;
pub const DEFAULT_ROUTER_BACKOFF_MS: u64 = 500;
pub const ROUTER_BACKOFF_CAP: Duration = Duration::from_secs(30);
pub const DEFAULT_STREAM_MAXLEN: usize = 10_000;

/// A consuming service with a fixed consumer group and topic set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Keeps User and Board replicas for the task service.
    Tasks,
    /// Persists and fans out notifications.
    Notifications,
}

impl ServiceKind {
    /// Consumer group shared by every instance of this service.
    pub fn group(&self) -> &'static str {
        match self {
            Self::Tasks => "task-service",
            Self::Notifications => "notification-service",
        }
    }

    pub fn topics(&self) -> &'static [&'static str] {
        match self {
            Self::Tasks => &[topics::USER_EVENTS, topics::BOARD_EVENTS],
            Self::Notifications => &[topics::TASK_EVENTS],
        }
    }

    pub fn topic_list(&self) -> Vec<String> {
        self.topics().iter().map(|t| t.to_string()).collect()
    }
}

/// Bounded retry policy for transient broker read failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before the router gives up.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_ROUTER_MAX_RETRIES,
            initial_backoff: Duration::from_millis(DEFAULT_ROUTER_BACKOFF_MS),
            max_backoff: ROUTER_BACKOFF_CAP,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Runtime configuration for one trellis process.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub redis_url: String,
    pub notify_url: String,
    /// Consumer name inside the group. Generated when unset.
    pub consumer: Option<String>,
    pub publish_timeout: Duration,
    pub publish_queue: usize,
    pub hub_queue: usize,
    pub ws_write_timeout: Duration,
    pub retry: RetryPolicy,
    pub stream_maxlen: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            notify_url: DEFAULT_NOTIFY_URL.to_string(),
            consumer: None,
            publish_timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            publish_queue: DEFAULT_PUBLISH_QUEUE,
            hub_queue: DEFAULT_HUB_QUEUE,
            ws_write_timeout: Duration::from_millis(DEFAULT_WS_WRITE_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            stream_maxlen: DEFAULT_STREAM_MAXLEN,
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `REDIS_URL` | `redis://127.0.0.1:6379` |
    /// | `TRELLIS_NOTIFY_URL` | `http://127.0.0.1:8080` |
    /// | `TRELLIS_CONSUMER` | generated |
    /// | `TRELLIS_PUBLISH_TIMEOUT_MS` | `3000` |
    /// | `TRELLIS_PUBLISH_QUEUE` | `1024` |
    /// | `TRELLIS_HUB_QUEUE` | `256` |
    /// | `TRELLIS_WS_WRITE_TIMEOUT_MS` | `5000` |
    /// | `TRELLIS_ROUTER_MAX_RETRIES` | `5` |
    /// | `TRELLIS_ROUTER_BACKOFF_MS` | `500` |
    /// | `TRELLIS_STREAM_MAXLEN` | `10000` |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ServiceConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            notify_url: lookup("TRELLIS_NOTIFY_URL").unwrap_or(defaults.notify_url),
            consumer: lookup("TRELLIS_CONSUMER").filter(|c| !c.trim().is_empty()),
            publish_timeout: number("TRELLIS_PUBLISH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish_timeout),
            publish_queue: number("TRELLIS_PUBLISH_QUEUE")
                .map(|n| (n as usize).max(1))
                .unwrap_or(defaults.publish_queue),
            hub_queue: number("TRELLIS_HUB_QUEUE")
                .map(|n| (n as usize).max(1))
                .unwrap_or(defaults.hub_queue),
            ws_write_timeout: number("TRELLIS_WS_WRITE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ws_write_timeout),
            retry: RetryPolicy {
                max_retries: number("TRELLIS_ROUTER_MAX_RETRIES")
                    .map(|n| n.min(u32::MAX as u64) as u32)
                    .unwrap_or(defaults.retry.max_retries),
                initial_backoff: number("TRELLIS_ROUTER_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.initial_backoff),
                max_backoff: defaults.retry.max_backoff,
            },
            stream_maxlen: number("TRELLIS_STREAM_MAXLEN")
                .map(|n| n as usize)
                .unwrap_or(defaults.stream_maxlen),
        }
    }

    /// Consumer name for `service`, falling back to `<group>-<random suffix>`.
    pub fn consumer_name(&self, service: ServiceKind) -> String {
        match &self.consumer {
            Some(name) => name.clone(),
            None => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("{}-{}", service.group(), &suffix[..8])
            }
        }
    }
}

//! Event router: one long-lived subscription per service process.
//!
//! The router receives envelopes in broker order and dispatches each through
//! its [`HandlerTable`]. Failures local to one envelope (unknown key, bad
//! payload, store error) are logged and never stop the loop. Broker read
//! errors are retried with backoff up to the configured budget; past that the
//! router terminates with [`TrellisError::RouterTerminated`].
//!
//! State machine: `Subscribing -> Running -> Terminated`.

pub mod table;

pub use table::{DispatchOutcome, EventHandler, HandlerTable, JsonHandler};

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::config::{RetryPolicy, ServiceKind};
use crate::error::{TrellisError, TrellisResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Subscribing,
    Running,
    Terminated,
}

/// Counters returned when the router stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub dispatched: u64,
    pub ignored: u64,
    pub failed: u64,
}

pub struct EventRouter {
    broker: Arc<dyn Broker>,
    group: String,
    consumer: String,
    topics: Vec<String>,
    table: HandlerTable,
    retry: RetryPolicy,
    state: watch::Sender<RouterState>,
}

impl EventRouter {
    /// Router subscribing to every topic that has a route in `table`.
    pub fn new(
        broker: Arc<dyn Broker>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        table: HandlerTable,
    ) -> Self {
        let (state, _) = watch::channel(RouterState::Subscribing);
        Self {
            broker,
            group: group.into(),
            consumer: consumer.into(),
            topics: table.topics(),
            table,
            retry: RetryPolicy::default(),
            state,
        }
    }

    /// Router using the fixed group and topic set of `service`.
    pub fn for_service(
        broker: Arc<dyn Broker>,
        service: ServiceKind,
        consumer: impl Into<String>,
        table: HandlerTable,
    ) -> Self {
        Self::new(broker, service.group(), consumer, table).with_topics(service.topic_list())
    }

    /// Subscribe to `topics` even where no route exists (envelopes there are ignored).
    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Watch the router's lifecycle state.
    pub fn state(&self) -> watch::Receiver<RouterState> {
        self.state.subscribe()
    }

    /// Subscribe and process envelopes until cancelled or the broker fails
    /// past the retry budget.
    ///
    /// A failed initial subscribe is returned as an error: the service
    /// cannot start without its subscription.
    pub async fn run(self, cancel: CancellationToken) -> TrellisResult<RouterStats> {
        let mut stats = RouterStats::default();
        self.state.send_replace(RouterState::Subscribing);

        let mut subscription = match self
            .broker
            .subscribe(&self.group, &self.consumer, &self.topics)
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                error!(group = %self.group, topics = ?self.topics, error = %e, "Failed to subscribe");
                self.state.send_replace(RouterState::Terminated);
                return Err(e);
            }
        };

        self.state.send_replace(RouterState::Running);
        info!(
            group = %self.group,
            consumer = %self.consumer,
            topics = ?self.topics,
            routes = self.table.len(),
            "Event router running"
        );

        let mut consecutive_failures: u32 = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = subscription.next() => next,
            };

            let delivery = match next {
                Ok(delivery) => {
                    consecutive_failures = 0;
                    delivery
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures > self.retry.max_retries {
                        error!(
                            group = %self.group,
                            attempts = consecutive_failures,
                            error = %e,
                            "Broker read failed past retry budget, terminating router"
                        );
                        self.state.send_replace(RouterState::Terminated);
                        return Err(TrellisError::RouterTerminated {
                            attempts: consecutive_failures,
                            last: e.to_string(),
                        });
                    }
                    let delay = self.retry.backoff(consecutive_failures);
                    warn!(
                        group = %self.group,
                        attempt = consecutive_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Broker read failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            let envelope = &delivery.envelope;
            debug!(
                topic = %envelope.topic(),
                key = %envelope.key(),
                offset = %delivery.offset,
                "Envelope received"
            );
            match self.table.dispatch(envelope).await {
                DispatchOutcome::Handled => stats.dispatched += 1,
                DispatchOutcome::Ignored => stats.ignored += 1,
                DispatchOutcome::Failed(e) => {
                    stats.failed += 1;
                    warn!(
                        topic = %envelope.topic(),
                        key = %envelope.key(),
                        offset = %delivery.offset,
                        payload = %envelope.payload_lossy(),
                        error = %e,
                        "Handler failed, dropping envelope"
                    );
                }
            }

            if let Err(e) = subscription.ack(&delivery).await {
                warn!(offset = %delivery.offset, error = %e, "Ack failed, envelope may be redelivered");
            }
        }

        self.state.send_replace(RouterState::Terminated);
        info!(group = %self.group, ?stats, "Event router stopped");
        Ok(stats)
    }
}

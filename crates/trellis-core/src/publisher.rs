//! Event publisher.
//!
//! Write paths hand envelopes to a bounded queue and return immediately; a
//! single background worker appends them to the broker with a short deadline.
//! Callers of [`Publisher::publish`] get no confirmation that the event was
//! durably recorded. A failed append is logged (and reported on the optional
//! failure channel) and then abandoned: no retry, no requeue.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::config::{DEFAULT_PUBLISH_QUEUE, DEFAULT_PUBLISH_TIMEOUT_MS};
use crate::envelope::Envelope;
use crate::error::{TrellisError, TrellisResult};

#[derive(Debug, Clone, Copy)]
pub struct PublisherConfig {
    /// Deadline for one broker append.
    pub timeout: Duration,
    /// Capacity of the pending-publish queue.
    pub queue: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            queue: DEFAULT_PUBLISH_QUEUE,
        }
    }
}

/// Result of handing an envelope to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Accepted into the queue; the broker append happens later.
    Queued,
    /// Not accepted. The event will never reach the broker.
    Rejected(String),
}

impl PublishOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// A queued append that did not make it to the broker.
#[derive(Debug, Clone)]
pub struct PublishFailure {
    pub topic: String,
    pub key: String,
    pub error: String,
}

/// Counters returned when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub failed: u64,
}

/// Cloneable handle used by request handlers.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Envelope>,
    broker: Arc<dyn Broker>,
    timeout: Duration,
}

/// Background task draining the publish queue.
pub struct PublishWorker {
    rx: mpsc::Receiver<Envelope>,
    broker: Arc<dyn Broker>,
    timeout: Duration,
    failures: Option<mpsc::Sender<PublishFailure>>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, config: PublisherConfig) -> (Self, PublishWorker) {
        let (tx, rx) = mpsc::channel(config.queue.max(1));
        let publisher = Self {
            tx,
            broker: broker.clone(),
            timeout: config.timeout,
        };
        let worker = PublishWorker {
            rx,
            broker,
            timeout: config.timeout,
            failures: None,
        };
        (publisher, worker)
    }

    /// Serialize `payload` and queue it for `(topic, key)`. Never blocks.
    pub fn publish<T: Serialize + ?Sized>(&self, topic: &str, key: &str, payload: &T) -> PublishOutcome {
        match Envelope::json(topic, key, payload) {
            Ok(envelope) => self.enqueue(envelope),
            Err(e) => {
                warn!(topic, key, error = %e, "Dropping event that could not be built");
                PublishOutcome::Rejected(e.to_string())
            }
        }
    }

    /// Queue a prebuilt envelope. Never blocks.
    pub fn enqueue(&self, envelope: Envelope) -> PublishOutcome {
        let (topic, key) = (envelope.topic().to_string(), envelope.key().to_string());
        match self.tx.try_send(envelope) {
            Ok(()) => {
                debug!(topic = %topic, key = %key, "Event queued for publishing");
                PublishOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(topic = %topic, key = %key, "Publish queue full, dropping event");
                PublishOutcome::Rejected(TrellisError::QueueFull("publish").to_string())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(topic = %topic, key = %key, "Publisher stopped, dropping event");
                PublishOutcome::Rejected(TrellisError::Closed("publish").to_string())
            }
        }
    }

    /// Append immediately and wait for the broker, bounded by the deadline.
    pub async fn publish_now(&self, envelope: &Envelope) -> TrellisResult<String> {
        append_with_deadline(self.broker.as_ref(), envelope, self.timeout).await
    }
}

impl PublishWorker {
    /// Report abandoned appends on `tx` as well as in the log.
    pub fn with_failures(mut self, tx: mpsc::Sender<PublishFailure>) -> Self {
        self.failures = Some(tx);
        self
    }

    /// Drain the queue until every publisher handle is dropped or `cancel`
    /// fires. On cancellation, envelopes already queued are still attempted.
    pub async fn run(mut self, cancel: CancellationToken) -> PublishStats {
        let mut stats = PublishStats::default();
        info!(timeout = ?self.timeout, "Publish worker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(envelope) => self.deliver(envelope, &mut stats).await,
                    None => {
                        info!(?stats, "Publish worker stopped, all publishers dropped");
                        return stats;
                    }
                },
            }
        }

        self.rx.close();
        while let Some(envelope) = self.rx.recv().await {
            self.deliver(envelope, &mut stats).await;
        }
        info!(?stats, "Publish worker drained and stopped");
        stats
    }

    async fn deliver(&self, envelope: Envelope, stats: &mut PublishStats) {
        match append_with_deadline(self.broker.as_ref(), &envelope, self.timeout).await {
            Ok(offset) => {
                stats.published += 1;
                debug!(topic = %envelope.topic(), key = %envelope.key(), offset = %offset, "Event published");
            }
            Err(e) => {
                stats.failed += 1;
                error!(
                    topic = %envelope.topic(),
                    key = %envelope.key(),
                    error = %e,
                    "Failed to publish event, abandoning"
                );
                if let Some(tx) = &self.failures {
                    let failure = PublishFailure {
                        topic: envelope.topic().to_string(),
                        key: envelope.key().to_string(),
                        error: e.to_string(),
                    };
                    if tx.try_send(failure).is_err() {
                        debug!("Publish failure channel full or closed");
                    }
                }
            }
        }
    }
}

/// One broker append, abandoned after `timeout`.
pub async fn append_with_deadline(
    broker: &dyn Broker,
    envelope: &Envelope,
    timeout: Duration,
) -> TrellisResult<String> {
    match tokio::time::timeout(timeout, broker.publish(envelope)).await {
        Ok(result) => result,
        Err(_) => Err(TrellisError::PublishTimeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, Subscription};
    use crate::envelope::{keys, topics};
    use async_trait::async_trait;

    /// Broker whose appends never complete.
    struct StalledBroker;

    #[async_trait]
    impl Broker for StalledBroker {
        async fn publish(&self, _envelope: &Envelope) -> TrellisResult<String> {
            std::future::pending().await
        }

        async fn subscribe(
            &self,
            _group: &str,
            _consumer: &str,
            _topics: &[String],
        ) -> TrellisResult<Box<dyn Subscription>> {
            Err(TrellisError::broker("not supported"))
        }
    }

    #[tokio::test]
    async fn test_publish_is_queued_then_appended() {
        let broker = MemoryBroker::new();
        let (publisher, worker) = Publisher::new(Arc::new(broker.clone()), PublisherConfig::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        let outcome = publisher.publish(topics::BOARD_EVENTS, keys::NEW_BOARD, &serde_json::json!({ "id": "b1" }));
        assert_eq!(outcome, PublishOutcome::Queued);

        drop(publisher);
        let stats = handle.await.unwrap();
        assert_eq!(stats, PublishStats { published: 1, failed: 0 });
        assert_eq!(broker.len(topics::BOARD_EVENTS), 1);
    }

    #[tokio::test]
    async fn test_failed_append_is_reported_not_retried() {
        let broker = MemoryBroker::new();
        broker.fail_next_publishes(1);
        let (publisher, worker) = Publisher::new(Arc::new(broker.clone()), PublisherConfig::default());
        let (fail_tx, mut fail_rx) = mpsc::channel(4);
        let handle = tokio::spawn(worker.with_failures(fail_tx).run(CancellationToken::new()));

        assert!(publisher.publish(topics::USER_EVENTS, keys::NEW_USER, &serde_json::json!({ "id": "u1" })).is_queued());
        assert!(publisher.publish(topics::USER_EVENTS, keys::NEW_USER, &serde_json::json!({ "id": "u2" })).is_queued());
        drop(publisher);

        let stats = handle.await.unwrap();
        assert_eq!(stats, PublishStats { published: 1, failed: 1 });

        let failure = fail_rx.recv().await.unwrap();
        assert_eq!(failure.topic, "user-events");
        assert_eq!(failure.key, "new-user");

        let records = broker.records(topics::USER_EVENTS);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload(), br#"{"id":"u2"}"#);
    }

    #[tokio::test]
    async fn test_stalled_broker_hits_deadline() {
        let (publisher, _worker) = Publisher::new(
            Arc::new(StalledBroker),
            PublisherConfig {
                timeout: Duration::from_millis(30),
                queue: 4,
            },
        );
        let env = Envelope::json(topics::BOARD_EVENTS, keys::DROP_BOARD, &serde_json::json!({ "id": "b1" })).unwrap();
        let err = publisher.publish_now(&env).await.unwrap_err();
        assert!(matches!(err, TrellisError::PublishTimeout(_)));
    }

    #[tokio::test]
    async fn test_full_queue_and_bad_envelope_are_rejected() {
        let (publisher, _worker) = Publisher::new(
            Arc::new(MemoryBroker::new()),
            PublisherConfig {
                timeout: Duration::from_secs(1),
                queue: 1,
            },
        );
        let payload = serde_json::json!({ "id": "b1" });
        assert!(publisher.publish(topics::BOARD_EVENTS, keys::NEW_BOARD, &payload).is_queued());
        assert!(matches!(
            publisher.publish(topics::BOARD_EVENTS, keys::NEW_BOARD, &payload),
            PublishOutcome::Rejected(_)
        ));
        assert!(matches!(
            publisher.publish("", keys::NEW_BOARD, &payload),
            PublishOutcome::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_cancel_drains_queued_events() {
        let broker = MemoryBroker::new();
        let (publisher, worker) = Publisher::new(Arc::new(broker.clone()), PublisherConfig::default());
        for id in ["a", "b", "c"] {
            publisher.publish(topics::BOARD_EVENTS, keys::NEW_BOARD, &serde_json::json!({ "id": id }));
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = worker.run(cancel).await;

        assert_eq!(stats.published, 3);
        assert_eq!(broker.len(topics::BOARD_EVENTS), 3);
        assert!(!publisher.enqueue(crate::events::new_board("d").unwrap()).is_queued());
    }
}

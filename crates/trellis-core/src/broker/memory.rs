//! In-process broker with per-group offsets.
//!
//! Each delivery stays pending for its (group, consumer) until acknowledged.
//! A new subscription under the same consumer name replays its pending
//! deliveries before reading past the group offset, so a consumer that
//! stops between handling and acknowledging sees the record again.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::{Broker, Delivery, Subscription};
use crate::envelope::Envelope;
use crate::error::{TrellisError, TrellisResult};

#[derive(Default)]
struct State {
    logs: HashMap<String, Vec<Envelope>>,
    /// (group, topic) -> index of the next undelivered record.
    offsets: HashMap<(String, String), usize>,
    /// (group, consumer) -> delivered but unacknowledged, in delivery order.
    pending: HashMap<(String, String), Vec<Delivery>>,
    acked: HashMap<String, usize>,
    fail_publishes: u32,
    fail_reads: u32,
    fail_subscribes: u32,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    appended: Notify,
}

/// Append-only topic logs held in memory. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended to `topic`.
    pub fn len(&self, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .logs
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().logs.values().all(Vec::is_empty)
    }

    /// Records appended to `topic`, in order.
    pub fn records(&self, topic: &str) -> Vec<Envelope> {
        self.inner
            .state
            .lock()
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of acknowledgements received from `group`.
    pub fn acked(&self, group: &str) -> usize {
        self.inner.state.lock().acked.get(group).copied().unwrap_or(0)
    }

    /// Deliveries handed to `consumer` of `group` and not yet acknowledged.
    pub fn pending(&self, group: &str, consumer: &str) -> usize {
        self.inner
            .state
            .lock()
            .pending
            .get(&(group.to_string(), consumer.to_string()))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Make the next `n` publish calls fail.
    pub fn fail_next_publishes(&self, n: u32) {
        self.inner.state.lock().fail_publishes = n;
    }

    /// Make the next `n` subscription reads fail.
    pub fn fail_next_reads(&self, n: u32) {
        self.inner.state.lock().fail_reads = n;
        self.inner.appended.notify_waiters();
    }

    /// Make the next `n` subscribe calls fail.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.inner.state.lock().fail_subscribes = n;
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, envelope: &Envelope) -> TrellisResult<String> {
        let offset = {
            let mut state = self.inner.state.lock();
            if state.fail_publishes > 0 {
                state.fail_publishes -= 1;
                return Err(TrellisError::broker("memory broker: injected publish failure"));
            }
            let log = state.logs.entry(envelope.topic().to_string()).or_default();
            log.push(envelope.clone());
            format!("{}-{}", envelope.topic(), log.len() - 1)
        };
        debug!(topic = %envelope.topic(), key = %envelope.key(), offset = %offset, "Appended envelope");
        self.inner.appended.notify_waiters();
        Ok(offset)
    }

    async fn subscribe(
        &self,
        group: &str,
        consumer: &str,
        topics: &[String],
    ) -> TrellisResult<Box<dyn Subscription>> {
        if topics.is_empty() {
            return Err(TrellisError::Config("subscription needs at least one topic".into()));
        }
        let replay: VecDeque<Delivery> = {
            let mut state = self.inner.state.lock();
            if state.fail_subscribes > 0 {
                state.fail_subscribes -= 1;
                return Err(TrellisError::broker("memory broker: injected subscribe failure"));
            }
            state
                .pending
                .get(&(group.to_string(), consumer.to_string()))
                .map(|pending| {
                    pending
                        .iter()
                        .filter(|d| topics.iter().any(|t| t == d.envelope.topic()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        debug!(group, consumer, ?topics, replay = replay.len(), "Memory subscription opened");
        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            topics: topics.to_vec(),
            replay,
        }))
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    group: String,
    consumer: String,
    topics: Vec<String>,
    /// Pending deliveries left over from an earlier subscription.
    replay: VecDeque<Delivery>,
}

impl MemorySubscription {
    fn poll_state(&self) -> Option<TrellisResult<Delivery>> {
        let mut state = self.inner.state.lock();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Some(Err(TrellisError::broker("memory broker: injected read failure")));
        }
        let State {
            logs,
            offsets,
            pending,
            ..
        } = &mut *state;
        for topic in &self.topics {
            let next = offsets
                .entry((self.group.clone(), topic.clone()))
                .or_insert(0);
            if let Some(envelope) = logs.get(topic).and_then(|log| log.get(*next)) {
                let delivery = Delivery {
                    envelope: envelope.clone(),
                    offset: format!("{}-{}", topic, *next),
                };
                *next += 1;
                pending
                    .entry((self.group.clone(), self.consumer.clone()))
                    .or_default()
                    .push(delivery.clone());
                return Some(Ok(delivery));
            }
        }
        None
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> TrellisResult<Delivery> {
        if let Some(delivery) = self.replay.pop_front() {
            debug!(group = %self.group, consumer = %self.consumer, offset = %delivery.offset, "Replaying pending delivery");
            return Ok(delivery);
        }
        loop {
            // Register interest before checking so an append between the
            // check and the await is not missed.
            let notified = self.inner.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.poll_state() {
                return result;
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> TrellisResult<()> {
        let mut state = self.inner.state.lock();
        if let Some(pending) = state
            .pending
            .get_mut(&(self.group.clone(), self.consumer.clone()))
        {
            pending.retain(|d| d.offset != delivery.offset);
        }
        *state.acked.entry(self.group.clone()).or_insert(0) += 1;
        Ok(())
    }
}

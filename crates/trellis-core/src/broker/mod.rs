//! Broker collaborator: a durable, partitioned, at-least-once log.
//!
//! The broker itself is external. This module only fixes the interface the
//! publisher and routers talk to, plus an in-process implementation used by
//! tests and single-process demos.

pub mod memory;

pub use memory::MemoryBroker;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::TrellisResult;

/// One envelope handed to a consumer, with the broker position it came from.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Envelope,
    /// Broker-assigned position (stream entry id, log offset).
    pub offset: String,
}

/// Append and subscribe operations of the broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append one record to `envelope.topic()`. Returns the assigned offset.
    async fn publish(&self, envelope: &Envelope) -> TrellisResult<String>;

    /// Open a subscription to `topics` as `consumer` inside `group`.
    ///
    /// Consumers sharing a group share one logical offset per topic.
    async fn subscribe(
        &self,
        group: &str,
        consumer: &str,
        topics: &[String],
    ) -> TrellisResult<Box<dyn Subscription>>;
}

/// A long-lived stream of deliveries for one consumer.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. Blocks until the broker has one.
    ///
    /// Must be cancel-safe: dropping the future before it resolves may cause
    /// a redelivery, never a loss.
    async fn next(&mut self) -> TrellisResult<Delivery>;

    /// Mark a delivery as processed for this consumer group.
    async fn ack(&mut self, delivery: &Delivery) -> TrellisResult<()>;
}

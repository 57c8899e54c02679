//! Trellis Redis Layer
//!
//! Redis Streams broker plus Redis-backed replica and notification stores.

pub mod admin;
pub mod broker;
pub mod client;
pub mod keys;
pub mod queries;

pub use broker::RedisStreamBroker;
pub use client::{init_pool, RedisError, RedisPool, RedisResult};
pub use queries::notifications::RedisNotificationStore;
pub use queries::replicas::RedisReplicaStore;

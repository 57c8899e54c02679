//! Trellis Core Library
//!
//! Event envelopes, publishing, routing, read replicas and notification
//! fan-out for the Trellis board services.

pub mod broker;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod hub;
pub mod notification;
pub mod notifier;
pub mod publisher;
pub mod replica;
pub mod router;

pub use envelope::Envelope;
pub use error::{TrellisError, TrellisResult};

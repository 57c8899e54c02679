//! Centralized error types for trellis.

use std::time::Duration;
use thiserror::Error;

/// Main error type for event propagation and notification operations.
#[derive(Error, Debug)]
pub enum TrellisError {
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Broker did not acknowledge within {0:?}")]
    PublishTimeout(Duration),

    #[error("Queue full: {0}")]
    QueueFull(&'static str),

    #[error("Channel closed: {0}")]
    Closed(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Router terminated after {attempts} consecutive broker failures: {last}")]
    RouterTerminated { attempts: u32, last: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for trellis operations.
pub type TrellisResult<T> = Result<T, TrellisError>;

impl TrellisError {
    /// Create a broker error.
    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error means the target simply did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

//! Wire format for a published fact.
//!
//! An [`Envelope`] names a topic (the independently ordered stream), a key
//! (the discriminator selecting a handler inside that topic) and an opaque
//! JSON payload whose shape is implied by the `(topic, key)` pair.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{TrellisError, TrellisResult};

/// Topic names shared by every service.
pub mod topics {
    pub const BOARD_EVENTS: &str = "board-events";
    pub const TASK_EVENTS: &str = "task-events";
    pub const USER_EVENTS: &str = "user-events";

    /// Every topic known to the system.
    pub const ALL: &[&str] = &[BOARD_EVENTS, TASK_EVENTS, USER_EVENTS];
}

/// Handler keys within a topic.
pub mod keys {
    pub const NEW_BOARD: &str = "new-board";
    pub const DROP_BOARD: &str = "drop-board";
    pub const NEW_TASK: &str = "new-task";
    pub const UPDATED_TASK: &str = "updated-task";
    pub const UPDATE_TASK_STATUS: &str = "update-task-status";
    pub const NEW_USER: &str = "new-user";
}

/// A `(topic, key, payload)` unit moved through the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    topic: String,
    key: String,
    payload: Vec<u8>,
}

impl Envelope {
    /// Build an envelope from raw payload bytes.
    ///
    /// Topic and key must be non-empty.
    pub fn new(
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> TrellisResult<Self> {
        let topic = topic.into();
        let key = key.into();
        if topic.trim().is_empty() {
            return Err(TrellisError::InvalidEnvelope("topic is empty".into()));
        }
        if key.trim().is_empty() {
            return Err(TrellisError::InvalidEnvelope(format!(
                "key is empty for topic '{}'",
                topic
            )));
        }
        Ok(Self {
            topic,
            key,
            payload: payload.into(),
        })
    }

    /// Build an envelope by serializing `value` as JSON.
    pub fn json<T: Serialize + ?Sized>(
        topic: impl Into<String>,
        key: impl Into<String>,
        value: &T,
    ) -> TrellisResult<Self> {
        let payload = serde_json::to_vec(value)?;
        Self::new(topic, key, payload)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as UTF-8 text, lossy. Only meant for log lines.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Deserialize the payload into the structure a handler expects.
    pub fn decode<T: DeserializeOwned>(&self) -> TrellisResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn into_parts(self) -> (String, String, Vec<u8>) {
        (self.topic, self.key, self.payload)
    }
}

//! Notifications: persisted first, then pushed to live clients.

pub mod dispatcher;
pub mod handlers;
pub mod memory;

pub use dispatcher::NotificationDispatcher;
pub use handlers::notification_handlers;
pub use memory::MemoryNotificationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrellisResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// New notification with a fresh id and a server-side timestamp.
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn save(&self, notification: &Notification) -> TrellisResult<()>;

    /// Notifications addressed to `user_id`, newest first.
    async fn list_for_user(&self, user_id: &str) -> TrellisResult<Vec<Notification>>;
}

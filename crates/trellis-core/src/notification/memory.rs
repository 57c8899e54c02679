//! In-memory notification store.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Notification, NotificationStore};
use crate::error::TrellisResult;

#[derive(Default)]
pub struct MemoryNotificationStore {
    rows: RwLock<Vec<Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Every stored notification in insertion order.
    pub fn all(&self) -> Vec<Notification> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn save(&self, notification: &Notification) -> TrellisResult<()> {
        self.rows.write().push(notification.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> TrellisResult<Vec<Notification>> {
        let mut rows: Vec<Notification> = self
            .rows
            .read()
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

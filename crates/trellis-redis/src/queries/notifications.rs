//! Notification store: Redis implementation.
//!
//! Notifications are hashes with a `data` JSON field; each user has a sorted
//! set of notification ids scored by creation time in milliseconds.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::warn;
use trellis_core::notification::{Notification, NotificationStore};
use trellis_core::TrellisResult;

use crate::client::{RedisPool, RedisResult};
use crate::keys;

/// Decode a stored row. Unreadable rows are logged and skipped so one bad
/// hash does not hide the rest of the history.
fn decode_row(id: &str, json: &str) -> Option<Notification> {
    match serde_json::from_str::<Notification>(json) {
        Ok(row) => Some(row),
        Err(e) => {
            warn!(id = %id, error = %e, "Skipping unreadable notification");
            None
        }
    }
}

#[derive(Clone)]
pub struct RedisNotificationStore {
    pool: RedisPool,
}

impl RedisNotificationStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    async fn save_row(&self, notification: &Notification) -> RedisResult<()> {
        let json = serde_json::to_string(notification)?;
        let mut conn = self.pool.clone();

        conn.hset::<_, _, _, ()>(keys::notification(&notification.id), "data", &json)
            .await?;

        let zkey = keys::user_notifications(&notification.user_id);
        conn.zadd::<_, _, _, ()>(&zkey, &notification.id, notification.created_at.timestamp_millis())
            .await?;
        Ok(())
    }

    async fn list_rows(&self, user_id: &str) -> RedisResult<Vec<Notification>> {
        let mut conn = self.pool.clone();
        let ids: Vec<String> = conn.zrevrange(keys::user_notifications(user_id), 0, -1).await?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let json: Option<String> = conn.hget(keys::notification(&id), "data").await?;
            match json {
                Some(j) => rows.extend(decode_row(&id, &j)),
                None => warn!(id = %id, "Notification indexed for user but missing"),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl NotificationStore for RedisNotificationStore {
    async fn save(&self, notification: &Notification) -> TrellisResult<()> {
        Ok(self.save_row(notification).await?)
    }

    async fn list_for_user(&self, user_id: &str) -> TrellisResult<Vec<Notification>> {
        Ok(self.list_rows(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_row_reads_stored_json() {
        let stored = Notification::new("u1", "hello");
        let json = serde_json::to_string(&stored).unwrap();
        assert_eq!(decode_row(&stored.id, &json), Some(stored));
    }

    #[test]
    fn test_corrupt_row_is_skipped() {
        assert_eq!(decode_row("n-1", "{not json"), None);
        assert_eq!(decode_row("n-2", r#"{"id":"n-2"}"#), None);
    }
}

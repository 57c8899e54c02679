use std::sync::Arc;

use tracing::{debug, error, warn};

use super::{Notification, NotificationStore};
use crate::error::TrellisResult;
use crate::hub::FanoutHub;

/// Persists notifications and forwards their message to the hub.
///
/// The store write is the durability boundary. Once it succeeds the
/// notification counts as delivered, whatever happens to the broadcast.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    hub: Option<FanoutHub>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store, hub: None }
    }

    pub fn with_hub(mut self, hub: FanoutHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    pub async fn dispatch(
        &self,
        user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> TrellisResult<Notification> {
        let notification = Notification::new(user_id, message);

        if let Err(e) = self.store.save(&notification).await {
            error!(user_id = %notification.user_id, error = %e, "Failed to persist notification");
            return Err(e);
        }
        debug!(id = %notification.id, user_id = %notification.user_id, "Notification persisted");

        match &self.hub {
            Some(hub) => {
                if let Err(e) = hub.broadcast(notification.message.clone()) {
                    warn!(id = %notification.id, error = %e, "Broadcast skipped, notification kept");
                }
            }
            None => debug!(id = %notification.id, "No hub attached, notification not pushed live"),
        }

        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrellisError;
    use crate::hub::{Connection, HubConfig};
    use crate::notification::MemoryNotificationStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct ChannelConnection(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl Connection for ChannelConnection {
        async fn send_text(&self, text: &str) -> TrellisResult<()> {
            self.0
                .send(text.to_string())
                .map_err(|_| TrellisError::Connection("peer gone".into()))
        }

        async fn close(&self) {}
    }

    struct DownStore;

    #[async_trait]
    impl NotificationStore for DownStore {
        async fn save(&self, _notification: &Notification) -> TrellisResult<()> {
            Err(TrellisError::store("connection refused"))
        }

        async fn list_for_user(&self, _user_id: &str) -> TrellisResult<Vec<Notification>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_dispatch_persists_then_reaches_every_connection() {
        let store = Arc::new(MemoryNotificationStore::new());
        let (hub, worker) = FanoutHub::new(HubConfig::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.register(Arc::new(ChannelConnection(tx_a))).await.unwrap();
        hub.register(Arc::new(ChannelConnection(tx_b))).await.unwrap();

        let dispatcher = NotificationDispatcher::new(store.clone()).with_hub(hub.clone());
        let sent = dispatcher.dispatch("u1", "hello").await.unwrap();

        let rows = store.all();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, "u1");
        assert_eq!(rows[0].message, "hello");
        assert_eq!(rows[0].id, sent.id);

        let wait = Duration::from_secs(2);
        assert_eq!(tokio::time::timeout(wait, rx_a.recv()).await.unwrap().unwrap(), "hello");
        assert_eq!(tokio::time::timeout(wait, rx_b.recv()).await.unwrap().unwrap(), "hello");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_broadcast() {
        let (hub, worker) = FanoutHub::new(HubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(Arc::new(ChannelConnection(tx))).await.unwrap();

        let dispatcher = NotificationDispatcher::new(Arc::new(DownStore)).with_hub(hub.clone());
        let err = dispatcher.dispatch("u1", "hello").await.unwrap_err();
        assert!(matches!(err, TrellisError::Store(_)));

        // Nothing was queued: shutting the worker down delivers nothing.
        let cancel = CancellationToken::new();
        cancel.cancel();
        worker.run(cancel).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_hub_does_not_undo_persistence() {
        let store = Arc::new(MemoryNotificationStore::new());
        let (hub, worker) = FanoutHub::new(HubConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        worker.run(cancel).await;

        let dispatcher = NotificationDispatcher::new(store.clone()).with_hub(hub);
        dispatcher.dispatch("u1", "offline").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_without_hub_only_persists() {
        let store = Arc::new(MemoryNotificationStore::new());
        let dispatcher = NotificationDispatcher::new(store.clone());
        dispatcher.dispatch("u9", "stored only").await.unwrap();
        assert_eq!(store.list_for_user("u9").await.unwrap().len(), 1);
    }
}

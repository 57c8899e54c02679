//! Connection registry and fan-out hub.
//!
//! Live client connections are tracked in one map behind one async mutex.
//! Registration, removal and every broadcast go through that lock; a
//! broadcast holds it for its writes so the set cannot change under them.
//! Messages reach the hub through a bounded queue drained by a single
//! [`HubWorker`]. A connection whose write fails (or exceeds the write
//! deadline) is unregistered, then closed after the lock is released.
//! Closes share the write deadline.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_HUB_QUEUE, DEFAULT_WS_WRITE_TIMEOUT_MS};
use crate::error::{TrellisError, TrellisResult};

/// A duplex client channel as seen by the hub. Only the write half matters.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write one text frame.
    async fn send_text(&self, text: &str) -> TrellisResult<()>;

    /// Close the channel. Must be safe to call more than once.
    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub queue: usize,
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue: DEFAULT_HUB_QUEUE,
            write_timeout: Duration::from_millis(DEFAULT_WS_WRITE_TIMEOUT_MS),
        }
    }
}

/// Result of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub pruned: usize,
}

struct HubInner {
    connections: Mutex<HashMap<ConnectionId, Arc<dyn Connection>>>,
    queue: mpsc::Sender<String>,
    next_id: AtomicU64,
    write_timeout: Duration,
    closed: AtomicBool,
}

/// Shared handle to the registry. Cheap to clone.
#[derive(Clone)]
pub struct FanoutHub {
    inner: Arc<HubInner>,
}

/// The hub's broadcast loop.
pub struct HubWorker {
    hub: FanoutHub,
    rx: mpsc::Receiver<String>,
}

impl FanoutHub {
    pub fn new(config: HubConfig) -> (Self, HubWorker) {
        let (tx, rx) = mpsc::channel(config.queue.max(1));
        let hub = Self {
            inner: Arc::new(HubInner {
                connections: Mutex::new(HashMap::new()),
                queue: tx,
                next_id: AtomicU64::new(1),
                write_timeout: config.write_timeout,
                closed: AtomicBool::new(false),
            }),
        };
        let worker = HubWorker { hub: hub.clone(), rx };
        (hub, worker)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Track `conn`; every later fan-out includes it until it is removed.
    pub async fn register(&self, conn: Arc<dyn Connection>) -> TrellisResult<ConnectionId> {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut connections = self.inner.connections.lock().await;
        if self.is_closed() {
            drop(connections);
            self.close_bounded(id, conn.as_ref()).await;
            return Err(TrellisError::Closed("hub"));
        }
        connections.insert(id, conn);
        info!(conn_id = %id, connections = connections.len(), "Client connection registered");
        Ok(id)
    }

    /// Stop tracking `id`. Returns false if it was already gone.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.inner.connections.lock().await;
        let removed = connections.remove(&id).is_some();
        if removed {
            info!(conn_id = %id, connections = connections.len(), "Client connection unregistered");
        }
        removed
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.lock().await.len()
    }

    /// Queue `message` for delivery to every registered connection.
    pub fn broadcast(&self, message: impl Into<String>) -> TrellisResult<()> {
        match self.inner.queue.try_send(message.into()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(TrellisError::QueueFull("hub")),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TrellisError::Closed("hub")),
        }
    }

    /// Write `message` to every registered connection, holding the registry
    /// lock for the writes. Failed or timed-out connections are removed under
    /// the lock and closed once it is released.
    pub async fn fan_out(&self, message: &str) -> FanoutReport {
        let mut connections = self.inner.connections.lock().await;
        let write_timeout = self.inner.write_timeout;

        let writes = connections.iter().map(|(id, conn)| async move {
            let result = match tokio::time::timeout(write_timeout, conn.send_text(message)).await {
                Ok(result) => result,
                Err(_) => Err(TrellisError::Connection(format!(
                    "write exceeded {:?}",
                    write_timeout
                ))),
            };
            (*id, result)
        });
        let results = join_all(writes).await;

        let mut report = FanoutReport::default();
        let mut dead = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(conn_id = %id, error = %e, "Write failed, dropping client connection");
                    if let Some(conn) = connections.remove(&id) {
                        dead.push((id, conn));
                    }
                }
            }
        }
        report.pruned = dead.len();
        let remaining = connections.len();
        // A pruned peer may never let its close finish; close outside the lock.
        drop(connections);

        join_all(dead.iter().map(|(id, conn)| self.close_bounded(*id, conn.as_ref()))).await;
        debug!(
            delivered = report.delivered,
            pruned = report.pruned,
            remaining,
            "Broadcast fan-out complete"
        );
        report
    }

    /// Close `conn`, giving up after the write deadline.
    async fn close_bounded(&self, id: ConnectionId, conn: &dyn Connection) {
        if tokio::time::timeout(self.inner.write_timeout, conn.close()).await.is_err() {
            warn!(conn_id = %id, "Close did not complete, abandoning client connection");
        }
    }

    async fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut connections = self.inner.connections.lock().await;
            connections.drain().collect()
        };
        let count = drained.len();
        debug!(count, "Closing client connections on shutdown");
        join_all(
            drained
                .iter()
                .map(|(id, conn)| self.close_bounded(*id, conn.as_ref())),
        )
        .await;
        count
    }
}

impl HubWorker {
    /// Deliver queued messages until `cancel` fires, then deliver what is
    /// still queued, close every connection and refuse further broadcasts.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Fan-out hub running");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(message) => {
                        self.hub.fan_out(&message).await;
                    }
                    None => break,
                },
            }
        }

        self.hub.inner.closed.store(true, Ordering::Release);
        self.rx.close();
        let mut drained = 0usize;
        while let Some(message) = self.rx.recv().await {
            self.hub.fan_out(&message).await;
            drained += 1;
        }
        let closed = self.hub.close_all().await;
        info!(drained, closed, "Fan-out hub stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Forwards frames to a channel, like a healthy socket.
    struct ChannelConnection {
        tx: mpsc::UnboundedSender<String>,
        closed: AtomicBool,
    }

    impl ChannelConnection {
        fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = Arc::new(Self {
                tx,
                closed: AtomicBool::new(false),
            });
            (conn, rx)
        }
    }

    #[async_trait]
    impl Connection for ChannelConnection {
        async fn send_text(&self, text: &str) -> TrellisResult<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TrellisError::Connection("closed".into()));
            }
            self.tx
                .send(text.to_string())
                .map_err(|_| TrellisError::Connection("peer gone".into()))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Every write fails.
    #[derive(Default)]
    struct BrokenConnection {
        closed: AtomicBool,
    }

    #[async_trait]
    impl Connection for BrokenConnection {
        async fn send_text(&self, _text: &str) -> TrellisResult<()> {
            Err(TrellisError::Connection("broken pipe".into()))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Writes never complete.
    struct StuckConnection;

    #[async_trait]
    impl Connection for StuckConnection {
        async fn send_text(&self, _text: &str) -> TrellisResult<()> {
            std::future::pending().await
        }

        async fn close(&self) {}
    }

    /// Neither writes nor closes ever complete, like a peer that stopped
    /// reading with a full send buffer.
    struct UnresponsivePeer;

    #[async_trait]
    impl Connection for UnresponsivePeer {
        async fn send_text(&self, _text: &str) -> TrellisResult<()> {
            std::future::pending().await
        }

        async fn close(&self) {
            std::future::pending::<()>().await
        }
    }

    fn hub() -> (FanoutHub, HubWorker) {
        FanoutHub::new(HubConfig {
            queue: 16,
            write_timeout: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn test_every_connection_gets_one_copy() {
        let (hub, _worker) = hub();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (conn, rx) = ChannelConnection::pair();
            hub.register(conn).await.unwrap();
            receivers.push(rx);
        }

        let report = hub.fan_out("hello").await;
        assert_eq!(report, FanoutReport { delivered: 3, pruned: 0 });
        for rx in receivers.iter_mut() {
            assert_eq!(rx.recv().await.unwrap(), "hello");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_failed_write_is_isolated_and_pruned() {
        let (hub, _worker) = hub();
        let (good_a, mut rx_a) = ChannelConnection::pair();
        let (good_b, mut rx_b) = ChannelConnection::pair();
        let broken = Arc::new(BrokenConnection::default());

        hub.register(good_a).await.unwrap();
        hub.register(broken.clone()).await.unwrap();
        hub.register(good_b).await.unwrap();

        let report = hub.fan_out("update").await;
        assert_eq!(report, FanoutReport { delivered: 2, pruned: 1 });
        assert_eq!(rx_a.recv().await.unwrap(), "update");
        assert_eq!(rx_b.recv().await.unwrap(), "update");
        assert!(broken.closed.load(Ordering::SeqCst));
        assert_eq!(hub.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_stuck_connection_hits_write_deadline() {
        let (hub, _worker) = hub();
        let (good, mut rx) = ChannelConnection::pair();
        hub.register(Arc::new(StuckConnection)).await.unwrap();
        hub.register(good).await.unwrap();

        let report = hub.fan_out("ping").await;
        assert_eq!(report, FanoutReport { delivered: 1, pruned: 1 });
        assert_eq!(rx.recv().await.unwrap(), "ping");
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_hanging_close_does_not_block_registry() {
        let (hub, _worker) = hub();
        let (good, mut rx) = ChannelConnection::pair();
        hub.register(Arc::new(UnresponsivePeer)).await.unwrap();
        hub.register(good).await.unwrap();

        let wait = Duration::from_secs(2);
        let report = tokio::time::timeout(wait, hub.fan_out("first"))
            .await
            .expect("fan-out finished");
        assert_eq!(report, FanoutReport { delivered: 1, pruned: 1 });
        assert_eq!(rx.recv().await.unwrap(), "first");

        let (other, mut other_rx) = ChannelConnection::pair();
        tokio::time::timeout(wait, hub.register(other))
            .await
            .expect("register was not blocked")
            .unwrap();
        assert_eq!(hub.connection_count().await, 2);

        let report = tokio::time::timeout(wait, hub.fan_out("second")).await.unwrap();
        assert_eq!(report, FanoutReport { delivered: 2, pruned: 0 });
        assert_eq!(other_rx.recv().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_pruned_close_runs_outside_registry_lock() {
        let (hub, _worker) = FanoutHub::new(HubConfig {
            queue: 16,
            write_timeout: Duration::from_millis(500),
        });
        hub.register(Arc::new(UnresponsivePeer)).await.unwrap();

        let fan_out = tokio::spawn({
            let hub = hub.clone();
            async move { hub.fan_out("ping").await }
        });
        // Past the write deadline the peer is pruned and its close is pending.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(!fan_out.is_finished());

        let count = tokio::time::timeout(Duration::from_millis(100), hub.connection_count())
            .await
            .expect("registry lock released before close");
        assert_eq!(count, 0);
        assert_eq!(fan_out.await.unwrap().pruned, 1);
    }

    #[tokio::test]
    async fn test_shutdown_completes_with_hanging_close() {
        let (hub, worker) = hub();
        let (conn, _rx) = ChannelConnection::pair();
        hub.register(Arc::new(UnresponsivePeer)).await.unwrap();
        hub.register(conn.clone()).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), worker.run(cancel))
            .await
            .expect("shutdown finished");

        assert!(conn.closed.load(Ordering::SeqCst));
        assert_eq!(hub.connection_count().await, 0);
        let late = hub.register(Arc::new(UnresponsivePeer));
        let refused = tokio::time::timeout(Duration::from_secs(2), late)
            .await
            .expect("late register finished");
        assert!(refused.is_err());
    }

    #[tokio::test]
    async fn test_unregister_removes_connection() {
        let (hub, _worker) = hub();
        let (conn, mut rx) = ChannelConnection::pair();
        let id = hub.register(conn).await.unwrap();

        assert!(hub.unregister(id).await);
        assert!(!hub.unregister(id).await);
        assert_eq!(hub.fan_out("nobody home").await, FanoutReport::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_worker_delivers_queued_broadcasts() {
        let (hub, worker) = hub();
        let (conn, mut rx) = ChannelConnection::pair();
        hub.register(conn).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));
        hub.broadcast("one").unwrap();
        hub.broadcast("two").unwrap();

        let wait = Duration::from_secs(2);
        assert_eq!(tokio::time::timeout(wait, rx.recv()).await.unwrap().unwrap(), "one");
        assert_eq!(tokio::time::timeout(wait, rx.recv()).await.unwrap().unwrap(), "two");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_then_closes() {
        let (hub, worker) = hub();
        let (conn, mut rx) = ChannelConnection::pair();
        hub.register(conn.clone()).await.unwrap();

        hub.broadcast("last words").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        worker.run(cancel).await;

        assert_eq!(rx.recv().await.unwrap(), "last words");
        assert!(conn.closed.load(Ordering::SeqCst));
        assert_eq!(hub.connection_count().await, 0);
        assert!(matches!(hub.broadcast("too late"), Err(TrellisError::Closed(_))));

        let (late, _rx) = ChannelConnection::pair();
        assert!(hub.register(late.clone()).await.is_err());
        assert!(late.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let (hub, _worker) = FanoutHub::new(HubConfig {
            queue: 1,
            write_timeout: Duration::from_millis(50),
        });
        hub.broadcast("a").unwrap();
        assert!(matches!(hub.broadcast("b"), Err(TrellisError::QueueFull(_))));
    }

    #[tokio::test]
    async fn test_register_racing_broadcasts_does_not_panic() {
        let (hub, worker) = hub();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        let mut tasks = Vec::new();
        for i in 0..20 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let (conn, rx) = ChannelConnection::pair();
                let id = hub.register(conn).await.unwrap();
                let _ = hub.broadcast(format!("msg-{}", i));
                if i % 2 == 0 {
                    hub.unregister(id).await;
                }
                rx
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(hub.connection_count().await, 0);
    }
}

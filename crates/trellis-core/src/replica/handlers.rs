//! Task-service handlers keeping User and Board replicas.
//!
//! Deliveries may repeat or arrive reordered across topics, so every handler
//! tolerates replays: upserts overwrite, deleting an absent board is benign.
//! If a `drop-board` overtakes its `new-board`, the board ends up present;
//! whichever handler runs last wins.

use std::sync::Arc;

use tracing::{debug, info};

use super::{BoardReplica, ReplicaStore, UpsertOutcome, UserReplica};
use crate::envelope::{keys, topics};
use crate::error::{TrellisError, TrellisResult};
use crate::events::EntityRef;
use crate::router::HandlerTable;

fn require_id(id: &str, what: &str) -> TrellisResult<()> {
    if id.trim().is_empty() {
        return Err(TrellisError::InvalidEnvelope(format!("{} event without id", what)));
    }
    Ok(())
}

fn log_upsert(kind: &str, id: &str, outcome: UpsertOutcome) {
    match outcome {
        UpsertOutcome::Inserted => info!(kind, id, "Replica stored"),
        UpsertOutcome::Replaced => debug!(kind, id, "Replica already present, replaced"),
    }
}

async fn store_user(store: Arc<dyn ReplicaStore>, user: UserReplica) -> TrellisResult<()> {
    require_id(&user.id, "new-user")?;
    let outcome = store.upsert_user(&user).await?;
    log_upsert("user", &user.id, outcome);
    Ok(())
}

async fn store_board(store: Arc<dyn ReplicaStore>, board: BoardReplica) -> TrellisResult<()> {
    require_id(&board.id, "new-board")?;
    let outcome = store.upsert_board(&board).await?;
    log_upsert("board", &board.id, outcome);
    Ok(())
}

async fn remove_board(store: Arc<dyn ReplicaStore>, board: EntityRef) -> TrellisResult<()> {
    require_id(&board.id, "drop-board")?;
    match store.delete_board(&board.id).await {
        Ok(()) => {
            info!(id = %board.id, "Board replica removed");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(id = %board.id, "Board replica already absent");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Dispatch table for `user-events/new-user`, `board-events/new-board` and
/// `board-events/drop-board`.
pub fn replica_handlers(store: Arc<dyn ReplicaStore>) -> HandlerTable {
    let users = store.clone();
    let boards = store.clone();
    let drops = store;

    HandlerTable::new()
        .on_json(topics::USER_EVENTS, keys::NEW_USER, move |user: UserReplica| {
            store_user(users.clone(), user)
        })
        .on_json(topics::BOARD_EVENTS, keys::NEW_BOARD, move |board: BoardReplica| {
            store_board(boards.clone(), board)
        })
        .on_json(topics::BOARD_EVENTS, keys::DROP_BOARD, move |board: EntityRef| {
            remove_board(drops.clone(), board)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, MemoryBroker};
    use crate::config::ServiceKind;
    use crate::envelope::Envelope;
    use crate::events;
    use crate::replica::MemoryReplicaStore;
    use crate::router::{DispatchOutcome, EventRouter, RouterState};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn wait_until<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_board_lifecycle_through_router() {
        let broker = MemoryBroker::new();
        let store = Arc::new(MemoryReplicaStore::new());
        let router = EventRouter::for_service(
            Arc::new(broker.clone()),
            ServiceKind::Tasks,
            "tasks-1",
            replica_handlers(store.clone()),
        );
        let mut state = router.state();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(router.run(cancel.clone()));
        state.wait_for(|s| *s == RouterState::Running).await.unwrap();

        broker.publish(&events::new_board("abc123").unwrap()).await.unwrap();
        wait_until(|| store.board_count() == 1).await;
        assert_eq!(
            store.get_board("abc123").await.unwrap(),
            Some(BoardReplica { id: "abc123".into() })
        );

        broker.publish(&events::drop_board("abc123").unwrap()).await.unwrap();
        wait_until(|| store.board_count() == 0).await;

        cancel.cancel();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_restart_before_ack_redelivers_and_keeps_one_replica() {
        let broker = MemoryBroker::new();
        let store = Arc::new(MemoryReplicaStore::new());
        broker.publish(&events::new_board("abc123").unwrap()).await.unwrap();

        // Stores the board, then never returns, so the delivery is not acknowledged.
        let hanging: Arc<dyn ReplicaStore> = store.clone();
        let table = HandlerTable::new().on_json(
            topics::BOARD_EVENTS,
            keys::NEW_BOARD,
            move |board: BoardReplica| {
                let store = hanging.clone();
                async move {
                    store_board(store, board).await?;
                    std::future::pending::<()>().await;
                    Ok::<(), TrellisError>(())
                }
            },
        );
        let router = EventRouter::for_service(
            Arc::new(broker.clone()),
            ServiceKind::Tasks,
            "tasks-1",
            table,
        );
        let handle = tokio::spawn(router.run(CancellationToken::new()));
        wait_until(|| store.board_count() == 1).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(broker.acked("task-service"), 0);
        assert_eq!(broker.pending("task-service", "tasks-1"), 1);

        let router = EventRouter::for_service(
            Arc::new(broker.clone()),
            ServiceKind::Tasks,
            "tasks-1",
            replica_handlers(store.clone()),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(router.run(cancel.clone()));
        wait_until(|| broker.acked("task-service") == 1).await;

        cancel.cancel();
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(store.board_count(), 1);
        assert_eq!(broker.pending("task-service", "tasks-1"), 0);
    }

    #[tokio::test]
    async fn test_replayed_new_board_leaves_one_replica() {
        let store = Arc::new(MemoryReplicaStore::new());
        let table = replica_handlers(store.clone());
        let env = events::new_board("abc123").unwrap();

        assert!(matches!(table.dispatch(&env).await, DispatchOutcome::Handled));
        assert!(matches!(table.dispatch(&env).await, DispatchOutcome::Handled));
        assert_eq!(store.board_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_before_new_does_not_fail() {
        let store = Arc::new(MemoryReplicaStore::new());
        let table = replica_handlers(store.clone());

        let drop = events::drop_board("x").unwrap();
        let create = events::new_board("x").unwrap();
        assert!(matches!(table.dispatch(&drop).await, DispatchOutcome::Handled));
        assert!(matches!(table.dispatch(&create).await, DispatchOutcome::Handled));

        // Last handler wins.
        assert!(store.get_board("x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_new_user_accepts_full_user_document() {
        let store = Arc::new(MemoryReplicaStore::new());
        let table = replica_handlers(store.clone());
        let env = Envelope::new(
            "user-events",
            "new-user",
            br#"{"id":"u1","name":"Ada","email":"ada@example.com","phone":"555"}"#.to_vec(),
        )
        .unwrap();

        assert!(matches!(table.dispatch(&env).await, DispatchOutcome::Handled));
        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_empty_id_is_rejected() {
        let store = Arc::new(MemoryReplicaStore::new());
        let table = replica_handlers(store.clone());
        let env = Envelope::new("board-events", "new-board", br#"{"id":""}"#.to_vec()).unwrap();

        assert!(matches!(
            table.dispatch(&env).await,
            DispatchOutcome::Failed(TrellisError::InvalidEnvelope(_))
        ));
        assert_eq!(store.board_count(), 0);
    }
}

//! Local read replicas of entities owned by other services.
//!
//! A replica is a partial projection: the task service only needs to know a
//! board or user exists. Replicas are created by "new-X" events, removed by
//! "drop-X" events, and never updated otherwise.

pub mod handlers;
pub mod memory;

pub use handlers::replica_handlers;
pub use memory::MemoryReplicaStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TrellisResult;

/// A board as seen by a foreign service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardReplica {
    pub id: String,
}

/// A user as seen by a foreign service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReplica {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Whether an upsert created the replica or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Replica persistence, keyed by the entity's natural identifier.
///
/// `upsert_*` must be idempotent: replaying the same event leaves exactly one
/// record. `delete_*` on a missing id returns [`crate::TrellisError::NotFound`].
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    async fn upsert_board(&self, board: &BoardReplica) -> TrellisResult<UpsertOutcome>;

    async fn delete_board(&self, board_id: &str) -> TrellisResult<()>;

    async fn get_board(&self, board_id: &str) -> TrellisResult<Option<BoardReplica>>;

    async fn upsert_user(&self, user: &UserReplica) -> TrellisResult<UpsertOutcome>;

    async fn delete_user(&self, user_id: &str) -> TrellisResult<()>;

    async fn get_user(&self, user_id: &str) -> TrellisResult<Option<UserReplica>>;
}

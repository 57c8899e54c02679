//! In-memory replica store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{BoardReplica, ReplicaStore, UpsertOutcome, UserReplica};
use crate::error::{TrellisError, TrellisResult};

#[derive(Default)]
pub struct MemoryReplicaStore {
    boards: RwLock<HashMap<String, BoardReplica>>,
    users: RwLock<HashMap<String, UserReplica>>,
}

impl MemoryReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn board_count(&self) -> usize {
        self.boards.read().len()
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }
}

fn upsert<T>(map: &RwLock<HashMap<String, T>>, id: &str, value: T) -> UpsertOutcome {
    match map.write().insert(id.to_string(), value) {
        Some(_) => UpsertOutcome::Replaced,
        None => UpsertOutcome::Inserted,
    }
}

#[async_trait]
impl ReplicaStore for MemoryReplicaStore {
    async fn upsert_board(&self, board: &BoardReplica) -> TrellisResult<UpsertOutcome> {
        Ok(upsert(&self.boards, &board.id, board.clone()))
    }

    async fn delete_board(&self, board_id: &str) -> TrellisResult<()> {
        self.boards
            .write()
            .remove(board_id)
            .map(|_| ())
            .ok_or_else(|| TrellisError::not_found(format!("Board replica not found: {}", board_id)))
    }

    async fn get_board(&self, board_id: &str) -> TrellisResult<Option<BoardReplica>> {
        Ok(self.boards.read().get(board_id).cloned())
    }

    async fn upsert_user(&self, user: &UserReplica) -> TrellisResult<UpsertOutcome> {
        Ok(upsert(&self.users, &user.id, user.clone()))
    }

    async fn delete_user(&self, user_id: &str) -> TrellisResult<()> {
        self.users
            .write()
            .remove(user_id)
            .map(|_| ())
            .ok_or_else(|| TrellisError::not_found(format!("User replica not found: {}", user_id)))
    }

    async fn get_user(&self, user_id: &str) -> TrellisResult<Option<UserReplica>> {
        Ok(self.users.read().get(user_id).cloned())
    }
}

//! Replica store: Redis implementation.
//!
//! Each replica is a hash with a `data` field holding its JSON; a set per kind
//! indexes the ids. SADD's reply tells an insert from a replay.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use trellis_core::replica::{BoardReplica, ReplicaStore, UpsertOutcome, UserReplica};
use trellis_core::TrellisResult;

use crate::client::{RedisError, RedisPool, RedisResult};
use crate::keys;

const BOARD: &str = "board";
const USER: &str = "user";

#[derive(Clone)]
pub struct RedisReplicaStore {
    pool: RedisPool,
}

impl RedisReplicaStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    async fn upsert<T: Serialize>(&self, kind: &str, id: &str, row: &T) -> RedisResult<UpsertOutcome> {
        let mut conn = self.pool.clone();
        conn.hset::<_, _, _, ()>(keys::replica(kind, id), "data", serde_json::to_string(row)?)
            .await?;
        let added: i64 = conn.sadd(keys::replica_index(kind), id).await?;
        Ok(if added > 0 {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Replaced
        })
    }

    async fn delete(&self, kind: &str, id: &str) -> RedisResult<()> {
        let mut conn = self.pool.clone();
        let removed: i64 = conn.srem(keys::replica_index(kind), id).await?;
        conn.del::<_, ()>(keys::replica(kind, id)).await?;
        if removed == 0 {
            return Err(RedisError::NotFound(format!("{} replica not found: {}", kind, id)));
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, kind: &str, id: &str) -> RedisResult<Option<T>> {
        let mut conn = self.pool.clone();
        let json: Option<String> = conn.hget(keys::replica(kind, id), "data").await?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    /// Ids of every replica of `kind` ("board" or "user").
    pub async fn list_ids(&self, kind: &str) -> RedisResult<Vec<String>> {
        let mut conn = self.pool.clone();
        let mut ids: Vec<String> = conn.smembers(keys::replica_index(kind)).await?;
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl ReplicaStore for RedisReplicaStore {
    async fn upsert_board(&self, board: &BoardReplica) -> TrellisResult<UpsertOutcome> {
        Ok(self.upsert(BOARD, &board.id, board).await?)
    }

    async fn delete_board(&self, board_id: &str) -> TrellisResult<()> {
        Ok(self.delete(BOARD, board_id).await?)
    }

    async fn get_board(&self, board_id: &str) -> TrellisResult<Option<BoardReplica>> {
        Ok(self.get(BOARD, board_id).await?)
    }

    async fn upsert_user(&self, user: &UserReplica) -> TrellisResult<UpsertOutcome> {
        Ok(self.upsert(USER, &user.id, user).await?)
    }

    async fn delete_user(&self, user_id: &str) -> TrellisResult<()> {
        Ok(self.delete(USER, user_id).await?)
    }

    async fn get_user(&self, user_id: &str) -> TrellisResult<Option<UserReplica>> {
        Ok(self.get(USER, user_id).await?)
    }
}

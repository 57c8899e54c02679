//! Event payloads and envelope builders for every `(topic, key)` pair.
//!
//! Write paths call these builders instead of spelling topic and key strings
//! by hand; consumers decode the same payload types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{keys, topics, Envelope};
use crate::error::TrellisResult;

/// Payload carrying only an entity identifier (`{"id": "..."}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

impl EntityRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    /// Parse from the wire representation. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "TODO" => Some(Self::Todo),
            "IN_PROGRESS" => Some(Self::InProgress),
            "DONE" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full task document as published on `task-events/new-task`.
///
/// Consumers only need a subset, so everything but `id` and `title`
/// tolerates absence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub board_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `board-events/new-board`
pub fn new_board(board_id: &str) -> TrellisResult<Envelope> {
    Envelope::json(topics::BOARD_EVENTS, keys::NEW_BOARD, &EntityRef::new(board_id))
}

/// `board-events/drop-board`
pub fn drop_board(board_id: &str) -> TrellisResult<Envelope> {
    Envelope::json(topics::BOARD_EVENTS, keys::DROP_BOARD, &EntityRef::new(board_id))
}

/// `user-events/new-user`
pub fn new_user(user_id: &str) -> TrellisResult<Envelope> {
    Envelope::json(topics::USER_EVENTS, keys::NEW_USER, &EntityRef::new(user_id))
}

/// `task-events/new-task`
pub fn new_task(task: &TaskEvent) -> TrellisResult<Envelope> {
    Envelope::json(topics::TASK_EVENTS, keys::NEW_TASK, task)
}

/// `task-events/updated-task` with an arbitrary partial-update document.
pub fn updated_task(changes: &serde_json::Value) -> TrellisResult<Envelope> {
    Envelope::json(topics::TASK_EVENTS, keys::UPDATED_TASK, changes)
}

/// `task-events/update-task-status`; the payload is the JSON-encoded status string.
pub fn task_status(status: TaskStatus) -> TrellisResult<Envelope> {
    Envelope::json(topics::TASK_EVENTS, keys::UPDATE_TASK_STATUS, &status)
}

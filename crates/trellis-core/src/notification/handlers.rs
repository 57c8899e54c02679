//! Notification-service handlers for `task-events`.

use serde::Deserialize;

use super::NotificationDispatcher;
use crate::envelope::{keys, topics};
use crate::error::TrellisResult;
use crate::events::TaskEvent;
use crate::router::HandlerTable;

/// `update-task-status` payload: the bare status string, or a task document.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusChange {
    Bare(String),
    Task {
        #[serde(default)]
        user_id: String,
        status: String,
    },
}

impl StatusChange {
    /// Recipient and status. An empty recipient means everyone.
    fn into_parts(self) -> (String, String) {
        match self {
            Self::Bare(status) => (String::new(), status),
            Self::Task { user_id, status } => (user_id, status),
        }
    }
}

async fn task_created(dispatcher: NotificationDispatcher, task: TaskEvent) -> TrellisResult<()> {
    let message = format!("New task created: {}", task.title);
    dispatcher.dispatch(task.user_id, message).await?;
    Ok(())
}

async fn status_changed(dispatcher: NotificationDispatcher, change: StatusChange) -> TrellisResult<()> {
    let (user_id, status) = change.into_parts();
    let message = format!("Task status updated: {}", status);
    dispatcher.dispatch(user_id, message).await?;
    Ok(())
}

/// Dispatch table for `task-events/new-task` and
/// `task-events/update-task-status`. `updated-task` is left unrouted.
pub fn notification_handlers(dispatcher: NotificationDispatcher) -> HandlerTable {
    let created = dispatcher.clone();
    let changed = dispatcher;

    HandlerTable::new()
        .on_json(topics::TASK_EVENTS, keys::NEW_TASK, move |task: TaskEvent| {
            task_created(created.clone(), task)
        })
        .on_json(topics::TASK_EVENTS, keys::UPDATE_TASK_STATUS, move |change: StatusChange| {
            status_changed(changed.clone(), change)
        })
}

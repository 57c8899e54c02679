//! HTTP client for the notification gateway.
//!
//! Services that trigger notifications synchronously (rather than through
//! `task-events`) post to `/notify` on the gateway.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DEFAULT_NOTIFY_URL;
use crate::error::{TrellisError, TrellisResult};

/// Body of `POST /notify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub user_id: String,
    pub message: String,
}

/// Success body of `POST /notify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyAck {
    pub message: String,
}

#[derive(Clone)]
pub struct NotifyClient {
    client: reqwest::Client,
    base_url: String,
}

impl NotifyClient {
    /// Uses `TRELLIS_NOTIFY_URL` if set, otherwise `http://127.0.0.1:8080`.
    pub fn new() -> Self {
        let base_url =
            std::env::var("TRELLIS_NOTIFY_URL").unwrap_or_else(|_| DEFAULT_NOTIFY_URL.to_string());
        Self::with_url(&base_url)
    }

    pub fn with_url(base_url: &str) -> Self {
        debug!(base_url = %base_url, "NotifyClient initialized");
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/notify", self.base_url)
    }

    /// Post a notification and wait for the gateway's acknowledgement.
    pub async fn send(&self, user_id: &str, message: &str) -> TrellisResult<NotifyAck> {
        let url = self.endpoint();
        let body = NotifyRequest {
            user_id: user_id.to_string(),
            message: message.to_string(),
        };

        debug!(url = %url, user_id = %user_id, "Sending notification");
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TrellisError::Connection(format!(
                "gateway answered {}: {}",
                status, text
            )));
        }
        Ok(response.json::<NotifyAck>().await?)
    }

    /// Fire-and-forget variant: failures are logged, never returned.
    pub async fn notify(&self, user_id: &str, message: &str) {
        match self.send(user_id, message).await {
            Ok(_) => debug!(user_id = %user_id, "Notification sent successfully"),
            Err(TrellisError::Http(e)) => {
                // Expected when the gateway is not running.
                debug!(user_id = %user_id, error = %e, url = %self.endpoint(), "Failed to reach notification gateway");
            }
            Err(e) => warn!(user_id = %user_id, error = %e, "Notification rejected by gateway"),
        }
    }
}

impl Default for NotifyClient {
    fn default() -> Self {
        Self::new()
    }
}

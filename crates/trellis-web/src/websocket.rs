//! WebSocket handler: every upgraded socket becomes a hub connection.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use trellis_core::hub::Connection;
use trellis_core::{TrellisError, TrellisResult};

use crate::state::AppState;

/// Write half of an upgraded socket.
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&self, text: &str) -> TrellisResult<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| TrellisError::Connection(e.to_string()))
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.close().await;
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Register the socket, then read until the peer goes away.
///
/// Clients send nothing of interest; the read loop only detects disconnects.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let conn = Arc::new(WsConnection::new(sender));

    let id = match state.hub.register(conn.clone()).await {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "Rejecting WebSocket client");
            return;
        }
    };
    info!(conn_id = %id, "WebSocket client connected");

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!(conn_id = %id, "WebSocket client sent close frame");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!(conn_id = %id, "Ignoring message from WebSocket client: {}", text.as_str());
            }
            Ok(_) => {}
            Err(e) => {
                debug!(conn_id = %id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    if state.hub.unregister(id).await {
        conn.close().await;
    }
    info!(conn_id = %id, "WebSocket client disconnected");
}

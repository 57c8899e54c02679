//! Trellis Notification Gateway
//!
//! Axum server accepting notifications over HTTP and pushing them to
//! WebSocket clients through the fan-out hub.

pub mod routes;
pub mod state;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/notify", post(routes::notify::notify))
        .route("/ws", get(websocket::ws_handler))
        .route("/health", get(routes::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the gateway until `shutdown` is cancelled.
pub async fn run_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Notification gateway listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("Notification gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;
    use trellis_core::hub::{FanoutHub, HubConfig};
    use trellis_core::notification::{
        MemoryNotificationStore, Notification, NotificationDispatcher, NotificationStore,
    };
    use trellis_core::{TrellisError, TrellisResult};

    struct DownStore;

    #[async_trait]
    impl NotificationStore for DownStore {
        async fn save(&self, _notification: &Notification) -> TrellisResult<()> {
            Err(TrellisError::store("database unavailable"))
        }

        async fn list_for_user(&self, _user_id: &str) -> TrellisResult<Vec<Notification>> {
            Ok(Vec::new())
        }
    }

    fn app_with(store: Arc<dyn NotificationStore>) -> Router {
        let (hub, _worker) = FanoutHub::new(HubConfig::default());
        let dispatcher = NotificationDispatcher::new(store).with_hub(hub.clone());
        create_router(AppState::new(dispatcher, hub))
    }

    fn post_notify(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/notify")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_notify_persists_and_acknowledges() {
        let store = Arc::new(MemoryNotificationStore::new());
        let app = app_with(store.clone());

        let response = app
            .oneshot(post_notify(r#"{"user_id":"u1","message":"hello"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["message"], "Notification sent");
        let rows = store.list_for_user("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "hello");
    }

    #[tokio::test]
    async fn test_notify_rejects_missing_fields() {
        let store = Arc::new(MemoryNotificationStore::new());
        let app = app_with(store.clone());

        let response = app
            .oneshot(post_notify(r#"{"user_id":"u1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_notify_rejects_blank_message() {
        let app = app_with(Arc::new(MemoryNotificationStore::new()));
        let response = app
            .oneshot(post_notify(r#"{"user_id":"u1","message":"  "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_notify_reports_persistence_failure() {
        let app = app_with(Arc::new(DownStore));
        let response = app
            .oneshot(post_notify(r#"{"user_id":"u1","message":"hello"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_health_reports_connection_count() {
        let app = app_with(Arc::new(MemoryNotificationStore::new()));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let app = app_with(Arc::new(MemoryNotificationStore::new()));
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}

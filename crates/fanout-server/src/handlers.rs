//! HTTP routes.
//!
//! - `GET /ws?token=..` upgrades an authenticated client to a session
//! - `GET /health` reports whether the backing store answers

use crate::auth::JwtVerifier;
use crate::config::Config;
use crate::metrics;
use crate::session::{Session, SessionContext};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fanout_core::{HubHandle, Identity, PresenceStore, StoreHealth, ViewerStore};
use fanout_transport::websocket;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    pub hub: HubHandle,
    pub verifier: JwtVerifier,
    pub presence: Arc<dyn PresenceStore>,
    pub viewers: Arc<dyn ViewerStore>,
    pub health: Arc<dyn StoreHealth>,
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(
        config: Config,
        hub: HubHandle,
        presence: Arc<dyn PresenceStore>,
        viewers: Arc<dyn ViewerStore>,
        health: Arc<dyn StoreHealth>,
    ) -> Self {
        let verifier = JwtVerifier::new(&config.auth.jwt_secret, config.auth.leeway_secs);
        Self {
            hub,
            verifier,
            presence,
            viewers,
            health,
            config,
        }
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            hub: self.hub.clone(),
            presence: Arc::clone(&self.presence),
            viewers: Arc::clone(&self.viewers),
            settings: self.config.session.clone(),
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Fanout server listening on {}", addr);
        info!("WebSocket endpoint: ws://{}/ws", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Stopped accepting connections");
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let ping = tokio::time::timeout(state.config.health_timeout(), state.health.ping()).await;

    match ping {
        Ok(Ok(())) => Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        }))
        .into_response(),
        failed => {
            match failed {
                Ok(Err(e)) => warn!(error = %e, "Health check failed"),
                _ => warn!("Health check timed out"),
            }
            metrics::record_error("health");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "error",
                    "error": "redis unavailable"
                })),
            )
                .into_response()
        }
    }
}

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let token = params.token.unwrap_or_default();
    if token.is_empty() {
        metrics::record_auth_failure("missing");
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    }

    let identity = match state.verifier.verify(&token) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            metrics::record_auth_failure("invalid");
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };

    ws.max_message_size(state.config.session.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, identity, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, identity: Identity, state: Arc<AppState>) {
    let (reader, writer) = websocket::split(socket, state.config.session.max_message_size);
    let session = Session::new(identity, state.session_context());
    debug!(connection = %session.info().id, "WebSocket upgraded");
    session.run(reader, writer).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{claims, sign, SECRET};
    use async_trait::async_trait;
    use fanout_core::{Bridge, Hub, HubConfig, MemoryStore, StoreError};
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::{self, Message};

    type Client =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

    struct SlowHealth;

    #[async_trait]
    impl StoreHealth for SlowHealth {
        async fn ping(&self) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.auth.jwt_secret = SECRET.into();
        config.health.timeout_ms = 50;
        config
    }

    async fn start(
        health: Option<Arc<dyn StoreHealth>>,
    ) -> (SocketAddr, HubHandle, CancellationToken) {
        let (hub, _task) = Hub::spawn(&HubConfig::default());
        let store = Arc::new(MemoryStore::new());
        let health: Arc<dyn StoreHealth> = match health {
            Some(health) => health,
            None => store.clone(),
        };
        let state = Arc::new(AppState::new(
            test_config(),
            hub.clone(),
            store.clone(),
            store,
            health,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, state, shutdown.clone()));
        (addr, hub, shutdown)
    }

    async fn connect(addr: SocketAddr, user: &str) -> Client {
        let token = sign(&claims(user, "T1"), SECRET);
        let url = format!("ws://{}/ws?token={}", addr, token);
        let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        client
    }

    async fn next_event(client: &mut Client) -> (String, Value) {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection ended")
                .unwrap();
            if let Message::Text(text) = message {
                let value: Value = serde_json::from_str(&text).unwrap();
                return (value["event"].as_str().unwrap().to_string(), value["data"].clone());
            }
        }
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            path, addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    type Handshake = Result<(Client, tungstenite::handshake::client::Response), tungstenite::Error>;

    fn rejected_status(result: Handshake) -> u16 {
        match result {
            Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("upgrade should have been refused"),
        }
    }

    #[tokio::test]
    async fn test_upgrade_requires_token() {
        let (addr, hub, _shutdown) = start(None).await;

        let missing = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr)).await;
        assert_eq!(rejected_status(missing), 401);

        let invalid =
            tokio_tungstenite::connect_async(format!("ws://{}/ws?token=garbage", addr)).await;
        assert_eq!(rejected_status(invalid), 401);

        let forged = sign(&claims("mallory", "T1"), "wrong-secret");
        let forged =
            tokio_tungstenite::connect_async(format!("ws://{}/ws?token={}", addr, forged)).await;
        assert_eq!(rejected_status(forged), 401);

        assert_eq!(hub.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_end_to_end_fanout() {
        let (addr, hub, _shutdown) = start(None).await;

        let mut alice = connect(addr, "alice").await;
        assert_eq!(next_event(&mut alice).await.0, "agent:online");

        let mut bob = connect(addr, "bob").await;
        assert_eq!(next_event(&mut bob).await.0, "agent:online");
        let (event, data) = next_event(&mut alice).await;
        assert_eq!(event, "agent:online");
        assert_eq!(data["userId"], "bob");

        alice
            .send(Message::Text(
                r#"{"event":"topic:join","data":{"topicId":"K9"}}"#.into(),
            ))
            .await
            .unwrap();
        let (event, data) = next_event(&mut alice).await;
        assert_eq!(event, "topic:viewers");
        assert_eq!(data["viewers"], serde_json::json!(["alice"]));

        let bridge = Bridge::new(hub.clone());
        let payload = serde_json::json!({
            "event": "ticket.updated",
            "tenant_id": "T1",
            "ticket": {"id": "K9", "status": "open"}
        });
        let sent = bridge.handle_payload(payload.to_string().as_bytes()).await.unwrap();
        assert_eq!(sent, 2);

        // Alice is in both rooms, bob only in the tenant room.
        assert_eq!(next_event(&mut alice).await.0, "ticket:updated");
        assert_eq!(next_event(&mut alice).await.0, "ticket:updated");
        let (event, data) = next_event(&mut bob).await;
        assert_eq!(event, "ticket:updated");
        assert_eq!(data["status"], "open");

        bob.close(None).await.unwrap();
        let (event, data) = next_event(&mut alice).await;
        assert_eq!(event, "agent:offline");
        assert_eq!(data["userId"], "bob");
    }

    #[tokio::test]
    async fn test_health() {
        let (addr, _hub, _shutdown) = start(None).await;
        let response = http_get(addr, "/health").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""status":"ok""#));
    }

    #[tokio::test]
    async fn test_health_reports_slow_store() {
        let (addr, _hub, _shutdown) = start(Some(Arc::new(SlowHealth))).await;
        let response = http_get(addr, "/health").await;
        assert!(response.starts_with("HTTP/1.1 503"));
        assert!(response.contains("redis unavailable"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (addr, _hub, shutdown) = start(None).await;
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}

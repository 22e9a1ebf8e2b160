//! WebSocket server implementation
//!
//! Listens for TCP connections, authenticates each upgrade request from its
//! `token` query parameter, and hands admitted sessions to the connection
//! handler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::CONTENT_TYPE;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::handler::serve_connection;
use crate::auth::{AuthError, Authenticator};
use crate::config::{HubSettings, ServerSettings};
use crate::hub::{Connection, Identity, Notifier, Registry};

/// Query string accepted on the upgrade request
#[derive(Debug, Default, Deserialize)]
struct UpgradeQuery {
    token: Option<String>,
}

/// WebSocket server fronting a [`Registry`]
pub struct HubServer {
    server: ServerSettings,
    hub: HubSettings,
    registry: Arc<Registry>,
    authenticator: Arc<dyn Authenticator>,
    shutdown_tx: broadcast::Sender<()>,
}

impl HubServer {
    /// Create a new WebSocket server
    pub fn new(
        server: ServerSettings,
        hub: HubSettings,
        registry: Arc<Registry>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            server,
            hub,
            registry,
            authenticator,
            shutdown_tx,
        }
    }

    /// Registry this server admits connections into
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Publishing handle for the CRUD layer
    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.registry())
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.server.socket_addr()).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    ///
    /// Live connections receive the same shutdown signal and close
    /// themselves.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        info!("WebSocket server listening on ws://{}{}", addr, self.server.path);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let ws_config = websocket_config(&self.hub);

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let registry = Arc::clone(&self.registry);
                            let authenticator = Arc::clone(&self.authenticator);
                            let path = self.server.path.clone();
                            let hub = self.hub.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            let ws_config = ws_config.clone();

                            tokio::spawn(async move {
                                let handshake = timeout(
                                    hub.handshake_timeout(),
                                    upgrade(stream, &path, authenticator.as_ref(), ws_config),
                                );
                                let upgraded = match handshake.await {
                                    Ok(Ok(upgraded)) => upgraded,
                                    Ok(Err(e)) => {
                                        debug!("Upgrade from {} failed: {}", peer_addr, e);
                                        return;
                                    }
                                    Err(_) => {
                                        warn!(
                                            "Upgrade from {} not completed within {:?}, dropping",
                                            peer_addr,
                                            hub.handshake_timeout()
                                        );
                                        return;
                                    }
                                };
                                handle_connection(upgraded, peer_addr, registry, hub, shutdown_rx).await;
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        // Wait for live connections to send their close frames
        let live = self.registry.connection_count().await;
        if live > 0 {
            info!("Waiting for {} live connections to close...", live);
            let deadline = Instant::now() + self.hub.write_timeout();
            while self.registry.connection_count().await > 0 && Instant::now() < deadline {
                sleep(Duration::from_millis(50)).await;
            }
        }

        Ok(())
    }
}

/// Limits applied to every upgraded connection
pub(crate) fn websocket_config(hub: &HubSettings) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(hub.max_message_size);
    config.max_frame_size = Some(hub.max_message_size);
    config
}

/// Perform the WebSocket handshake, admitting only authenticated requests
/// for the configured path
async fn upgrade(
    stream: TcpStream,
    path: &str,
    authenticator: &dyn Authenticator,
    ws_config: WebSocketConfig,
) -> anyhow::Result<(WebSocketStream<TcpStream>, Identity)> {
    let mut admitted = None;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let identity = authorize(request, path, authenticator)?;
        admitted = Some(identity);
        Ok(response)
    };
    let ws_stream = accept_hdr_async_with_config(stream, callback, Some(ws_config)).await?;

    match admitted {
        Some(identity) => Ok((ws_stream, identity)),
        None => anyhow::bail!("handshake completed without an identity"),
    }
}

/// Serve one authenticated session
async fn handle_connection(
    upgraded: (WebSocketStream<TcpStream>, Identity),
    peer_addr: SocketAddr,
    registry: Arc<Registry>,
    hub: HubSettings,
    shutdown_rx: broadcast::Receiver<()>,
) {
    let (ws_stream, identity) = upgraded;
    info!("New connection from {} as user {}", peer_addr, identity);

    let (connection, outbox) = Connection::new(identity, hub.outbox_capacity);
    serve_connection(ws_stream, connection, outbox, registry, hub, shutdown_rx).await;

    info!("Connection from {} closed", peer_addr);
}

/// Check the upgrade request's path and bearer token
fn authorize(
    request: &Request,
    path: &str,
    authenticator: &dyn Authenticator,
) -> Result<Identity, ErrorResponse> {
    if request.uri().path() != path {
        return Err(reject(StatusCode::NOT_FOUND, "Not found"));
    }

    let token = bearer_token(request).unwrap_or_default();
    authenticator.verify(&token).map_err(|e| {
        warn!("Rejected WebSocket upgrade: {}", e);
        reject(rejection_status(&e), &e.to_string())
    })
}

/// HTTP status an authentication failure is reported with
fn rejection_status(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
        AuthError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::MissingToken | AuthError::Expired | AuthError::InvalidToken(_) => {
            StatusCode::UNAUTHORIZED
        }
    }
}

fn reject(status: StatusCode, message: &str) -> ErrorResponse {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = ErrorResponse::new(Some(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Percent-decoded `token` query parameter, if present and non-empty.
///
/// A query that does not parse (for example a repeated `token` key) yields
/// no token.
fn bearer_token(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    let parsed: UpgradeQuery = match serde_urlencoded::from_str(query) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Unparseable upgrade query: {}", e);
            return None;
        }
    };
    parsed.token.filter(|token| !token.is_empty())
}

//! WebSocket connection handler
//!
//! Drives one admitted connection with two cooperating processes:
//!
//! - the reader decodes `join_group` / `leave_group` control messages and
//!   enforces the idle deadline;
//! - the writer drains the outbox onto the socket and sends keepalive pings.
//!
//! Whichever side stops first (transport error, timeout, close, or server
//! shutdown) ends the session: the connection is dismissed from the registry,
//! which closes the outbox so the writer sends a close frame and exits.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::protocol::ClientMessage;
use crate::config::HubSettings;
use crate::hub::{Connection, ConnectionId, Outbox, Registry};

/// Reasons a connection's session ends abnormally
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("No inbound activity for {0:?}")]
    IdleTimeout(Duration),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("Writer task failed: {0}")]
    Writer(#[from] JoinError),
}

/// Result type for connection processes
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Admit `connection` and serve it until the session ends.
///
/// Always leaves the connection dismissed when it returns.
pub async fn serve_connection<S>(
    ws_stream: WebSocketStream<S>,
    connection: Connection,
    outbox: Outbox,
    registry: Arc<Registry>,
    settings: HubSettings,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = registry.admit(connection).await;
    let (ws_sender, ws_receiver) = ws_stream.split();

    let mut writer = tokio::spawn(write_loop(
        ws_sender,
        outbox,
        settings.ping_interval(),
        settings.write_timeout(),
    ));
    let mut writer_done = false;

    let outcome = tokio::select! {
        result = read_loop(ws_receiver, id, &registry, settings.idle_timeout()) => result,
        joined = &mut writer => {
            writer_done = true;
            joined.map_err(ConnectionError::from).and_then(|result| result)
        }
        _ = shutdown_rx.recv() => {
            debug!("Shutdown signal received, closing connection {}", id);
            Ok(())
        }
    };

    match &outcome {
        Ok(()) => debug!("Connection {} ended", id),
        Err(ConnectionError::IdleTimeout(after)) => {
            info!("Connection {} idle for {:?}, closing", id, after)
        }
        Err(e) => warn!("Connection {} failed: {}", id, e),
    }

    registry.dismiss(id).await;

    // Dismissal closed the outbox; give the writer a chance to flush and send
    // its close frame
    if !writer_done {
        match timeout(settings.write_timeout(), &mut writer).await {
            Ok(Ok(Err(e))) => debug!("Writer for {} stopped: {}", id, e),
            Ok(Err(e)) => warn!("Writer for {} failed: {}", id, e),
            Ok(Ok(Ok(()))) => {}
            Err(_) => {
                debug!("Writer for {} did not finish, aborting", id);
                writer.abort();
            }
        }
    }
}

/// Read inbound frames until the peer goes away or goes quiet
async fn read_loop<S>(
    mut ws_receiver: SplitStream<WebSocketStream<S>>,
    id: ConnectionId,
    registry: &Registry,
    idle_timeout: Duration,
) -> ConnectionResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = match timeout(idle_timeout, ws_receiver.next()).await {
            Err(_) => return Err(ConnectionError::IdleTimeout(idle_timeout)),
            Ok(None) => {
                debug!("Connection {} stream ended", id);
                return Ok(());
            }
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => handle_control(text.as_bytes(), id, registry).await,
            Message::Binary(data) => handle_control(&data, id, registry).await,
            Message::Close(frame) => {
                debug!("Connection {} requested close: {:?}", id, frame);
                return Ok(());
            }
            // Pings are answered by tungstenite; any frame counts as activity
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

/// Apply one control message. Malformed frames are dropped.
async fn handle_control(raw: &[u8], id: ConnectionId, registry: &Registry) {
    match ClientMessage::from_slice(raw) {
        Ok(ClientMessage::JoinGroup { group_id }) => {
            registry.join(id, &group_id).await;
        }
        Ok(ClientMessage::LeaveGroup { group_id }) => {
            registry.leave(id, &group_id).await;
        }
        Ok(ClientMessage::Unknown) => {
            debug!("Ignoring unrecognized control message from {}", id);
        }
        Err(e) => {
            warn!(
                "Discarding malformed message from {}: {} | {}",
                id,
                e,
                String::from_utf8_lossy(&raw[..raw.len().min(100)])
            );
        }
    }
}

/// Drain the outbox to the socket and keep the transport alive
async fn write_loop<S>(
    mut ws_sender: SplitSink<WebSocketStream<S>, Message>,
    mut outbox: Outbox,
    ping_interval: Duration,
    write_timeout: Duration,
) -> ConnectionResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut heartbeat = interval_at(Instant::now() + ping_interval, ping_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbox.recv() => match next {
                Some(payload) => {
                    // Frames own their text, so the shared payload is copied
                    // once per socket here
                    send_within(&mut ws_sender, Message::Text(payload.to_string()), write_timeout).await?;
                }
                None => {
                    // Dismissed: say goodbye, ignoring a peer that is already gone
                    let _ = send_within(&mut ws_sender, Message::Close(None), write_timeout).await;
                    return Ok(());
                }
            },
            _ = heartbeat.tick() => {
                send_within(&mut ws_sender, Message::Ping(Vec::new()), write_timeout).await?;
            }
        }
    }
}

async fn send_within<S>(
    ws_sender: &mut SplitSink<WebSocketStream<S>, Message>,
    message: Message,
    limit: Duration,
) -> ConnectionResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(limit, ws_sender.send(message)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ConnectionError::WriteTimeout(limit)),
    }
}

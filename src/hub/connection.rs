//! Live connection handles
//!
//! A [`Connection`] is the registry-side half of one authenticated WebSocket
//! session: its id, the identity it was admitted with, and the sending end of
//! its outbox. The receiving end ([`Outbox`]) is owned by the session's writer.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Default number of payloads a connection may have queued before it is
/// considered stalled
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Room identifier (a voting group id)
pub type RoomId = String;

/// Serialized notification, shared by every recipient of a broadcast
pub type Payload = Arc<str>;

/// Opaque handle identifying one live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated principal behind a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    user_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_id)
    }
}

/// Outcome of a non-blocking push onto an outbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Payload accepted
    Queued,
    /// Outbox at capacity; the consumer is not keeping up
    Full,
    /// Writer has gone away
    Closed,
}

/// Registry-side half of a live session
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    connected_at: Instant,
    sender: mpsc::Sender<Payload>,
}

impl Connection {
    /// Create a connection with a bounded outbox of `capacity` payloads.
    ///
    /// Returns the connection (to be handed to the registry) and the outbox
    /// receiver (to be drained by the session's writer). Dropping the
    /// connection closes the outbox.
    pub fn new(identity: Identity, capacity: usize) -> (Self, Outbox) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: ConnectionId::new(),
            identity,
            connected_at: Instant::now(),
            sender,
        };
        (connection, Outbox { receiver })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Push a payload without waiting for room in the outbox
    pub(crate) fn try_enqueue(&self, payload: &Payload) -> Enqueue {
        match self.sender.try_send(Arc::clone(payload)) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => Enqueue::Full,
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }
}

/// Consumer end of a connection's outbox
#[derive(Debug)]
pub struct Outbox {
    receiver: mpsc::Receiver<Payload>,
}

impl Outbox {
    /// Wait for the next payload. Returns `None` once the connection has been
    /// dismissed and everything queued before that has been drained.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.receiver.recv().await
    }

    /// Take the next payload if one is already queued
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.receiver.try_recv().ok()
    }
}

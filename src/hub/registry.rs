//! Connection registry
//!
//! Tracks every live connection and which rooms each one has joined, and is
//! the only place notifications are fanned out from.
//!
//! Both indexes (connection -> rooms, room -> connections) live in one
//! structure behind a single `RwLock`, so membership changes update both
//! sides together. Broadcast only needs the read side; connections whose
//! outbox is full are collected during the fan-out and dismissed afterwards
//! under the write lock.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{Connection, ConnectionId, Enqueue, Payload, RoomId};

/// A registered connection together with the rooms it belongs to
#[derive(Debug)]
struct Member {
    connection: Connection,
    rooms: HashSet<RoomId>,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Member>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl RegistryState {
    /// Remove a connection from every index. Dropping the returned member
    /// closes its outbox.
    fn remove(&mut self, id: ConnectionId) -> Option<Member> {
        let member = self.connections.remove(&id)?;
        for room in &member.rooms {
            self.detach(room, id);
        }
        Some(member)
    }

    /// Drop `id` from a room's member set, deleting the room once empty
    fn detach(&mut self, room: &str, id: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Process-wide index of live connections and room membership
///
/// Every operation is total: unknown connections and unknown rooms are
/// no-ops, never errors.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. It receives nothing until it joins a room.
    pub async fn admit(&self, connection: Connection) -> ConnectionId {
        let id = connection.id();
        let user = connection.identity().clone();

        let mut state = self.state.write().await;
        state.connections.insert(
            id,
            Member {
                connection,
                rooms: HashSet::new(),
            },
        );

        info!(
            "Admitted connection {} for user {} ({} live)",
            id,
            user,
            state.connections.len()
        );
        id
    }

    /// Remove a connection from the registry and from every room it joined,
    /// closing its outbox.
    ///
    /// Idempotent: returns `true` only for the call that actually removed it.
    pub async fn dismiss(&self, id: ConnectionId) -> bool {
        let removed = {
            let mut state = self.state.write().await;
            state.remove(id)
        };

        match removed {
            Some(member) => {
                info!(
                    "Dismissed connection {} for user {} after {:?} ({} rooms)",
                    id,
                    member.connection.identity(),
                    member.connection.connected_at().elapsed(),
                    member.rooms.len()
                );
                true
            }
            None => false,
        }
    }

    /// Add a connection to a room, creating the room if needed.
    ///
    /// Returns `true` if membership changed. Joining twice, or joining with
    /// a connection that is no longer registered, changes nothing.
    pub async fn join(&self, id: ConnectionId, room: &str) -> bool {
        let mut state = self.state.write().await;

        let Some(member) = state.connections.get_mut(&id) else {
            debug!("Ignoring join of {} by unknown connection {}", room, id);
            return false;
        };
        if !member.rooms.insert(room.to_string()) {
            return false;
        }

        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(id);

        debug!("Connection {} joined room {}", id, room);
        true
    }

    /// Remove a connection from a room. Returns `true` if membership changed.
    pub async fn leave(&self, id: ConnectionId, room: &str) -> bool {
        let mut state = self.state.write().await;

        let left = state
            .connections
            .get_mut(&id)
            .is_some_and(|member| member.rooms.remove(room));
        if left {
            state.detach(room, id);
            debug!("Connection {} left room {}", id, room);
        }
        left
    }

    /// Enqueue `payload` on the outbox of every connection currently in
    /// `room`.
    ///
    /// Never waits on a consumer: a connection whose outbox is full (or whose
    /// writer is gone) is dismissed instead. A room with no members is a
    /// silent no-op.
    pub async fn broadcast_to_room(&self, room: &str, payload: Payload) {
        let started = Instant::now();
        let mut delivered = 0usize;
        let mut stalled = Vec::new();

        {
            let state = self.state.read().await;
            let Some(members) = state.rooms.get(room) else {
                debug!("Broadcast to empty room {}", room);
                return;
            };

            for id in members {
                let Some(member) = state.connections.get(id) else {
                    continue;
                };
                match member.connection.try_enqueue(&payload) {
                    Enqueue::Queued => delivered += 1,
                    Enqueue::Full => {
                        warn!(
                            "Outbox full for connection {} (user {}), dropping it",
                            id,
                            member.connection.identity()
                        );
                        stalled.push(*id);
                    }
                    Enqueue::Closed => stalled.push(*id),
                }
            }
        }

        for id in stalled {
            self.dismiss(id).await;
        }

        debug!(
            "Broadcast to room {}: {} recipients in {:?}",
            room,
            delivered,
            started.elapsed()
        );
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Number of rooms with at least one member
    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    /// Number of connections in a room (0 for unknown rooms)
    pub async fn room_size(&self, room: &str) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(room)
            .map_or(0, HashSet::len)
    }

    /// Whether the connection is still registered
    pub async fn is_admitted(&self, id: ConnectionId) -> bool {
        self.state.read().await.connections.contains_key(&id)
    }

    /// Rooms a connection has joined, or `None` if it is not registered
    pub async fn rooms_of(&self, id: ConnectionId) -> Option<HashSet<RoomId>> {
        self.state
            .read()
            .await
            .connections
            .get(&id)
            .map(|member| member.rooms.clone())
    }

    /// Check that both indexes agree and no room is empty
    #[cfg(test)]
    pub(crate) async fn assert_consistent(&self) {
        let state = self.state.read().await;

        for (room, members) in &state.rooms {
            assert!(!members.is_empty(), "room {room} kept with no members");
            for id in members {
                let member = state
                    .connections
                    .get(id)
                    .unwrap_or_else(|| panic!("room {room} references dismissed {id}"));
                assert!(member.rooms.contains(room), "{id} missing back-reference to {room}");
            }
        }

        for (id, member) in &state.connections {
            for room in &member.rooms {
                assert!(
                    state.rooms.get(room).is_some_and(|m| m.contains(id)),
                    "{id} claims {room} but room does not list it"
                );
            }
        }
    }
}

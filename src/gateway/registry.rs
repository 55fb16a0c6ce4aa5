/// Connection registry
///
/// Holds every live socket, the user it belongs to and the one conversation
/// room it has joined. Created once at startup and shared through the
/// application context. Delivery is a non-blocking `try_send` onto each
/// socket's bounded outbound channel; a full or closed channel drops the
/// event.
use crate::gateway::events::ServerEvent;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outbound events buffered per socket
pub const SOCKET_BUFFER: usize = 64;

pub type SocketId = Uuid;

struct SocketEntry {
    user_id: String,
    room: Option<String>,
    tx: mpsc::Sender<ServerEvent>,
}

#[derive(Default)]
struct RegistryState {
    sockets: HashMap<SocketId, SocketEntry>,
    users: HashMap<String, HashSet<SocketId>>,
    rooms: HashMap<String, HashSet<SocketId>>,
    draining: bool,
}

impl RegistryState {
    fn remove_from_room(&mut self, socket_id: SocketId, room: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&socket_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Registry counters for health reporting
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RegistryStats {
    pub sockets: usize,
    pub users: usize,
    pub rooms: usize,
}

/// Live socket registry
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    buffer: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(SOCKET_BUFFER)
    }
}

impl ConnectionRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            buffer,
        }
    }

    /// Register a socket for `user_id`. Returns `None` once draining.
    pub async fn register(&self, user_id: &str) -> Option<(SocketId, mpsc::Receiver<ServerEvent>)> {
        let mut state = self.state.write().await;
        if state.draining {
            return None;
        }

        let socket_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        state.sockets.insert(
            socket_id,
            SocketEntry {
                user_id: user_id.to_string(),
                room: None,
                tx,
            },
        );
        state
            .users
            .entry(user_id.to_string())
            .or_default()
            .insert(socket_id);

        tracing::debug!(%socket_id, user_id, "Socket registered");
        Some((socket_id, rx))
    }

    /// Forget a socket and its room membership
    pub async fn unregister(&self, socket_id: SocketId) {
        let mut state = self.state.write().await;
        let Some(entry) = state.sockets.remove(&socket_id) else {
            return;
        };

        if let Some(room) = &entry.room {
            state.remove_from_room(socket_id, room);
        }
        if let Some(sockets) = state.users.get_mut(&entry.user_id) {
            sockets.remove(&socket_id);
            if sockets.is_empty() {
                state.users.remove(&entry.user_id);
            }
        }

        tracing::debug!(%socket_id, user_id = %entry.user_id, "Socket unregistered");
    }

    /// Put a socket in `room`, leaving whatever room it was in.
    /// Returns the previous room.
    pub async fn join(&self, socket_id: SocketId, room: &str) -> Option<String> {
        let mut state = self.state.write().await;
        let previous = match state.sockets.get_mut(&socket_id) {
            Some(entry) => entry.room.replace(room.to_string()),
            None => return None,
        };

        if let Some(previous_room) = &previous {
            state.remove_from_room(socket_id, previous_room);
        }
        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(socket_id);

        previous
    }

    /// Take a socket out of `room`; false if it was not in it
    pub async fn leave(&self, socket_id: SocketId, room: &str) -> bool {
        let mut state = self.state.write().await;
        match state.sockets.get_mut(&socket_id) {
            Some(entry) if entry.room.as_deref() == Some(room) => entry.room = None,
            _ => return false,
        }
        state.remove_from_room(socket_id, room);
        true
    }

    pub async fn room_of(&self, socket_id: SocketId) -> Option<String> {
        let state = self.state.read().await;
        state.sockets.get(&socket_id).and_then(|e| e.room.clone())
    }

    /// Whether any of the user's sockets is joined to `room`
    pub async fn is_user_in_room(&self, user_id: &str, room: &str) -> bool {
        let state = self.state.read().await;
        state.rooms.get(room).map_or(false, |members| {
            members.iter().any(|id| {
                state
                    .sockets
                    .get(id)
                    .map_or(false, |entry| entry.user_id == user_id)
            })
        })
    }

    pub async fn is_user_connected(&self, user_id: &str) -> bool {
        let state = self.state.read().await;
        state.users.contains_key(user_id)
    }

    /// Deliver to every socket in `room` except `except`. Returns the number
    /// of sockets the event was queued for.
    pub async fn emit_to_room(&self, room: &str, event: &ServerEvent, except: Option<SocketId>) -> usize {
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(room) else {
            return 0;
        };

        members
            .iter()
            .filter(|id| Some(**id) != except)
            .filter_map(|id| state.sockets.get(id).map(|entry| (id, entry)))
            .filter(|(id, entry)| deliver(**id, entry, event))
            .count()
    }

    /// Deliver to every socket of `user_id`, whatever room they are in
    pub async fn emit_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        let state = self.state.read().await;
        let Some(sockets) = state.users.get(user_id) else {
            return 0;
        };

        sockets
            .iter()
            .filter_map(|id| state.sockets.get(id).map(|entry| (id, entry)))
            .filter(|(id, entry)| deliver(**id, entry, event))
            .count()
    }

    pub async fn emit_to_socket(&self, socket_id: SocketId, event: &ServerEvent) -> bool {
        let state = self.state.read().await;
        state
            .sockets
            .get(&socket_id)
            .map_or(false, |entry| deliver(socket_id, entry, event))
    }

    /// Stop accepting sockets and drop every outbound channel, which ends
    /// each socket's write loop.
    pub async fn shutdown(&self) -> usize {
        let mut state = self.state.write().await;
        state.draining = true;
        let drained = state.sockets.len();
        state.sockets.clear();
        state.users.clear();
        state.rooms.clear();

        tracing::info!(sockets = drained, "Connection registry drained");
        drained
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        RegistryStats {
            sockets: state.sockets.len(),
            users: state.users.len(),
            rooms: state.rooms.len(),
        }
    }
}

fn deliver(socket_id: SocketId, entry: &SocketEntry, event: &ServerEvent) -> bool {
    match entry.tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(%socket_id, event = event.name(), "Socket buffer full, dropping event");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(%socket_id, event = event.name(), "Socket closed, dropping event");
            false
        }
    }
}

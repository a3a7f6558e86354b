use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type Payload = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
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
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    name: String,
    sender: mpsc::Sender<Payload>,
}

impl Connection {
    pub fn open(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: ConnectionId::new(),
            name: name.into(),
            sender,
        };
        (connection, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
pub struct RoomHub {
    rooms: DashMap<String, HashMap<ConnectionId, Connection>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &str, connection: Connection) {
        let id = connection.id;
        let mut members = self.rooms.entry(room.to_string()).or_default();
        if members.insert(id, connection).is_none() {
            debug!(room, connection = %id, members = members.len(), "connection joined room");
        }
    }

    pub fn leave(&self, room: &str, id: ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(&id).is_some(),
            None => false,
        };
        if removed {
            self.drop_if_empty(room);
            debug!(room, connection = %id, "connection left room");
        }
        removed
    }

    /// Queues `payload` for every connection in `room` and returns how many
    /// accepted it. Connections that cannot take it are removed.
    pub fn broadcast(&self, room: &str, payload: impl Into<Payload>) -> usize {
        let payload = payload.into();
        let mut delivered = 0;
        let mut evicted = Vec::new();

        // The room's entry stays locked for the whole pass, so joins and
        // leaves on this room wait until every member has been offered the
        // payload.
        {
            let Some(mut members) = self.rooms.get_mut(room) else {
                return 0;
            };
            members.retain(|id, connection| match connection.sender.try_send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    evicted.push((*id, connection.name.clone(), "queue full"));
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    evicted.push((*id, connection.name.clone(), "closed"));
                    false
                }
            });
        }

        if !evicted.is_empty() {
            for (id, name, reason) in &evicted {
                debug!(
                    room,
                    connection = %id,
                    name = %name,
                    reason,
                    "dropping connection after failed delivery"
                );
            }
            self.drop_if_empty(room);
        }

        delivered
    }

    pub fn broadcast_json<T: Serialize>(&self, room: &str, event: &T) -> usize {
        match serde_json::to_string(event) {
            Ok(json) => self.broadcast(room, json),
            Err(err) => {
                warn!(room, %err, "failed to serialize room event");
                0
            }
        }
    }

    pub fn connection_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drops every registration for `room`. Messages already queued are still
    /// delivered before each session winds down.
    pub fn close_room(&self, room: &str) -> usize {
        let closed = self
            .rooms
            .remove(room)
            .map(|(_, members)| members.len())
            .unwrap_or(0);
        if closed > 0 {
            info!(room, connections = closed, "room closed");
        }
        closed
    }

    pub fn shutdown(&self) {
        let connections: usize = self.rooms.iter().map(|room| room.len()).sum();
        self.rooms.clear();
        info!(connections, "room hub shut down");
    }

    fn drop_if_empty(&self, room: &str) {
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }
}

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::events::{chat_text, RoomEvent};
use crate::hub::{Connection, ConnectionId, RoomHub};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Joined = 1,
    Active = 2,
    Closed = 3,
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Joined,
            2 => SessionState::Active,
            _ => SessionState::Closed,
        }
    }
}

pub struct ChatSession {
    hub: Arc<RoomHub>,
    room_code: String,
    user_name: String,
    connection_id: ConnectionId,
    state: AtomicU8,
}

impl ChatSession {
    pub fn new(hub: Arc<RoomHub>, room_code: impl Into<String>, connection: &Connection) -> Self {
        Self {
            hub,
            room_code: room_code.into(),
            user_name: connection.name().to_string(),
            connection_id: connection.id(),
            state: AtomicU8::new(SessionState::Connecting as u8),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.load(Ordering::Acquire).into()
    }

    pub fn join(&self, connection: Connection) -> bool {
        if !self.transition(SessionState::Connecting, SessionState::Joined) {
            return false;
        }
        self.hub.join(&self.room_code, connection);
        // A close that raced the registration found nothing to remove.
        if self.state() == SessionState::Closed {
            self.hub.leave(&self.room_code, self.connection_id);
            return false;
        }
        self.hub
            .broadcast_json(&self.room_code, &RoomEvent::joined(&self.user_name));
        true
    }

    pub fn activate(&self) -> bool {
        self.transition(SessionState::Joined, SessionState::Active)
    }

    pub fn relay(&self, raw: &str) -> bool {
        if self.state() != SessionState::Active {
            return false;
        }
        let event = RoomEvent::chat(self.user_name.as_str(), chat_text(raw));
        self.hub.broadcast_json(&self.room_code, &event);
        true
    }

    /// Moves to `Closed`. Returns true for the call that performed the close.
    pub fn close(&self) -> bool {
        let previous: SessionState = self
            .state
            .swap(SessionState::Closed as u8, Ordering::AcqRel)
            .into();
        if previous == SessionState::Closed {
            return false;
        }
        if previous != SessionState::Connecting {
            self.hub.leave(&self.room_code, self.connection_id);
        }
        true
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Drives a chat connection until the client leaves or the hub drops it.
pub async fn run(
    socket: WebSocket,
    hub: Arc<RoomHub>,
    room_code: String,
    user_name: String,
    queue_capacity: usize,
) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut outbox) = Connection::open(user_name.as_str(), queue_capacity);
    let session = Arc::new(ChatSession::new(hub, room_code.as_str(), &connection));

    if !session.join(connection) || !session.activate() {
        session.close();
        return;
    }
    info!(room = %room_code, user = %user_name, "chat session started");

    // Ends once the hub lets go of the connection or the socket stops
    // accepting writes.
    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = outbox.recv().await {
            if sink.send(Message::Text(payload.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if !reader.relay(&text) {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!(%err, "chat socket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => {}
    }

    session.close();
    info!(room = %room_code, user = %user_name, "chat session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn drain(rx: &mut Outbox) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            out.push(serde_json::from_str(&payload).unwrap());
        }
        out
    }

    type Outbox = mpsc::Receiver<crate::hub::Payload>;

    fn session(hub: &Arc<RoomHub>, name: &str) -> (Arc<ChatSession>, Connection, Outbox) {
        let (connection, rx) = Connection::open(name, 16);
        let session = Arc::new(ChatSession::new(hub.clone(), "ABC123", &connection));
        (session, connection, rx)
    }

    #[test]
    fn join_announces_and_relays_chat() {
        let hub = Arc::new(RoomHub::new());
        let (alice, alice_conn, mut alice_rx) = session(&hub, "alice");
        assert_eq!(alice.state(), SessionState::Connecting);

        assert!(alice.join(alice_conn));
        assert_eq!(alice.state(), SessionState::Joined);
        assert!(!alice.relay("too early"));
        assert!(alice.activate());

        assert!(alice.relay(r#"{"message":"hello"}"#));
        assert!(alice.relay("not json"));

        let msgs = drain(&mut alice_rx);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0]["type"], "system");
        assert_eq!(msgs[0]["message"], "alice joined the chat.");
        assert_eq!(msgs[1]["type"], "chat");
        assert_eq!(msgs[1]["sender"], "alice");
        assert_eq!(msgs[1]["message"], "hello");
        assert_eq!(msgs[2]["message"], "not json");
    }

    #[test]
    fn close_is_idempotent() {
        let hub = Arc::new(RoomHub::new());
        let (alice, alice_conn, _rx) = session(&hub, "alice");
        let (bob, bob_conn, mut bob_rx) = session(&hub, "bob");
        alice.join(alice_conn);
        alice.activate();
        bob.join(bob_conn);
        bob.activate();
        assert_eq!(hub.connection_count("ABC123"), 2);

        assert!(alice.close());
        assert!(!alice.close());
        assert_eq!(alice.state(), SessionState::Closed);
        assert_eq!(hub.connection_count("ABC123"), 1);

        assert!(!alice.relay("ghost"));
        assert!(!alice.activate());
        drain(&mut bob_rx);
        bob.relay("still here");
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[test]
    fn close_before_join_never_registers() {
        let hub = Arc::new(RoomHub::new());
        let (alice, alice_conn, _rx) = session(&hub, "alice");
        assert!(alice.close());
        assert!(!alice.join(alice_conn));
        assert_eq!(hub.connection_count("ABC123"), 0);
    }

    #[test]
    fn concurrent_close_removes_once() {
        let hub = Arc::new(RoomHub::new());
        let (alice, alice_conn, _rx) = session(&hub, "alice");
        alice.join(alice_conn);
        alice.activate();

        let closers: Vec<_> = (0..8)
            .map(|_| {
                let s = alice.clone();
                std::thread::spawn(move || s.close())
            })
            .collect();
        let wins = closers
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|closed| *closed)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(hub.room_count(), 0);
    }
}

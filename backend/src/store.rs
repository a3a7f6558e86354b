use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use santa_core::{Assignment, Participant, Poll, Room, RoomError};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("room not found")]
    RoomNotFound,
    #[error(transparent)]
    Room(#[from] RoomError),
}

#[derive(Clone, Default)]
pub struct RoomStore {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
    persist_path: Option<PathBuf>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut store = Self::default();
        store.persist_path = Some(path.clone());
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, Room>>(&bytes) {
                Ok(saved) => {
                    info!(rooms = saved.len(), path = %path.display(), "loaded rooms");
                    *store.rooms.write().await = saved;
                }
                Err(err) => warn!(%err, path = %path.display(), "ignoring unreadable room file"),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(%err, path = %path.display(), "could not read room file"),
        }
        store
    }

    async fn persist(&self) {
        if let Some(path) = &self.persist_path {
            let snapshot = {
                let rooms = self.rooms.read().await;
                rooms.clone()
            };
            match serde_json::to_vec_pretty(&snapshot) {
                Ok(json) => {
                    if let Err(err) = tokio::fs::write(path, json).await {
                        error!(%err, path = %path.display(), "persist error");
                    }
                }
                Err(err) => error!(%err, "failed to serialize rooms"),
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn contains(&self, code: &str) -> bool {
        self.rooms.read().await.contains_key(code)
    }

    pub async fn find_room(&self, code: &str) -> Option<Room> {
        self.rooms.read().await.get(code).cloned()
    }

    pub async fn create_room(
        &self,
        name: impl Into<String>,
        host: Participant,
        exchange_date: Option<String>,
    ) -> Room {
        let mut rooms = self.rooms.write().await;
        let code = {
            let mut rng = rand::thread_rng();
            loop {
                let candidate = generate_room_code(&mut rng);
                if !rooms.contains_key(&candidate) {
                    break candidate;
                }
            }
        };
        let room = Room::new(code.clone(), name, host, exchange_date, now_millis());
        rooms.insert(code, room.clone());
        drop(rooms);
        self.persist().await;
        room
    }

    pub async fn delete_room(&self, code: &str) -> Result<Room, StoreError> {
        let removed = self.rooms.write().await.remove(code);
        let room = removed.ok_or(StoreError::RoomNotFound)?;
        self.persist().await;
        Ok(room)
    }

    pub async fn append_participant(
        &self,
        code: &str,
        participant: Participant,
    ) -> Result<Participant, StoreError> {
        self.update(code, |room| {
            room.add_participant(participant.clone())?;
            Ok(participant)
        })
        .await
    }

    pub async fn remove_participant(
        &self,
        code: &str,
        id: &str,
    ) -> Result<Participant, StoreError> {
        self.update(code, |room| room.remove_participant(id)).await
    }

    /// Stores a computed assignment and starts the exchange. Fails if the
    /// room's participants changed since the assignment was computed.
    pub async fn save_assignment(
        &self,
        code: &str,
        assignment: Assignment,
    ) -> Result<Room, StoreError> {
        self.update(code, |room| {
            room.apply_assignment(assignment)?;
            Ok(room.clone())
        })
        .await
    }

    pub async fn add_poll(&self, code: &str, poll: Poll) -> Result<Poll, StoreError> {
        self.update(code, |room| {
            room.add_poll(poll.clone());
            Ok(poll)
        })
        .await
    }

    pub async fn record_vote(
        &self,
        code: &str,
        poll_id: &str,
        voter_id: &str,
        option: &str,
    ) -> Result<Poll, StoreError> {
        self.update(code, |room| room.vote(poll_id, voter_id, option).cloned())
            .await
    }

    async fn update<T>(
        &self,
        code: &str,
        f: impl FnOnce(&mut Room) -> Result<T, RoomError>,
    ) -> Result<T, StoreError> {
        let result = {
            let mut rooms = self.rooms.write().await;
            let room = rooms.get_mut(code).ok_or(StoreError::RoomNotFound)?;
            f(room)?
        };
        self.persist().await;
        Ok(result)
    }
}

pub fn generate_room_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    fn host() -> Participant {
        Participant::new("host-id", "alice")
    }

    #[test]
    fn room_codes_are_short_uppercase_alphanumeric() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            let code = generate_room_code(&mut rng);
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn create_find_delete() {
        let store = RoomStore::new();
        let room = store.create_room("office", host(), None).await;
        assert!(room.participants[0].is_host);
        assert_eq!(store.find_room(&room.code).await, Some(room.clone()));

        store.delete_room(&room.code).await.unwrap();
        assert!(store.find_room(&room.code).await.is_none());
        assert_eq!(
            store.delete_room(&room.code).await.unwrap_err(),
            StoreError::RoomNotFound
        );
    }

    #[tokio::test]
    async fn missing_room_reported() {
        let store = RoomStore::new();
        let err = store
            .append_participant("NOPE00", Participant::new("x", "x"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::RoomNotFound);
        let err = store.remove_participant("NOPE00", "x").await.unwrap_err();
        assert_eq!(err, StoreError::RoomNotFound);
    }

    #[tokio::test]
    async fn assignment_saved_once() {
        let store = RoomStore::new();
        let room = store.create_room("office", host(), None).await;
        store
            .append_participant(&room.code, Participant::new("bob-id", "bob"))
            .await
            .unwrap();

        let current = store.find_room(&room.code).await.unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let assignment = santa_core::assign(&current.participants, &mut rng).unwrap();
        let saved = store
            .save_assignment(&room.code, assignment.clone())
            .await
            .unwrap();
        assert!(saved.is_started);
        assert_eq!(saved.participants[0].giftee_id.as_deref(), Some("bob-id"));

        let err = store
            .save_assignment(&room.code, assignment)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Room(RoomError::AlreadyStarted));
    }

    #[tokio::test]
    async fn persistence_writes_and_loads_rooms() {
        let path = std::env::temp_dir().join(format!("santa_rooms_{}.json", Uuid::new_v4()));
        let store = RoomStore::with_persistence(path.clone()).await;
        let room = store.create_room("office", host(), Some("2026-12-24".into())).await;
        store
            .append_participant(&room.code, Participant::new("bob-id", "bob"))
            .await
            .unwrap();

        assert!(tokio::fs::metadata(&path).await.is_ok());

        let loaded = RoomStore::with_persistence(path.clone()).await;
        let reloaded = loaded.find_room(&room.code).await.unwrap();
        assert_eq!(reloaded.participants.len(), 2);
        assert_eq!(reloaded.exchange_date.as_deref(), Some("2026-12-24"));

        let _ = tokio::fs::remove_file(&path).await;
    }
}

pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod store;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use santa_core::{Participant, Poll, Room};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::events::RoomEvent;
use crate::hub::RoomHub;
use crate::store::RoomStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    store: RoomStore,
    hub: Arc<RoomHub>,
    config: Arc<Config>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(RoomStore::new(), Config::default())
    }
}

impl AppState {
    pub fn new(store: RoomStore, config: Config) -> Self {
        Self {
            store,
            hub: Arc::new(RoomHub::new()),
            config: Arc::new(config),
        }
    }

    pub async fn from_config(config: Config) -> Self {
        let store = match &config.persist_path {
            Some(path) => RoomStore::with_persistence(path.clone()).await,
            None => RoomStore::new(),
        };
        Self::new(store, config)
    }

    pub fn store(&self) -> &RoomStore {
        &self.store
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

pub fn app(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_origins.as_deref());
    Router::new()
        .route("/api", get(status))
        .route("/health", get(health))
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/join", post(join_room))
        .route("/api/rooms/:code", get(get_room).delete(delete_room))
        .route("/api/rooms/:code/start", post(start_exchange))
        .route(
            "/api/rooms/:code/participants/:participant_id",
            delete(remove_participant),
        )
        .route("/api/rooms/:code/polls", post(create_poll))
        .route("/api/rooms/:code/polls/:poll_id/vote", post(vote_poll))
        .route("/ws/:code/:user_name", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origins {
        None => layer.allow_origin(Any),
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(origin = %o, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            layer.allow_origin(parsed)
        }
    }
}

async fn status() -> Json<serde_json::Value> {
    Json(json!({ "message": "Secret Santa API is running", "version": VERSION }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "rooms": state.store.len().await,
        "live_rooms": state.hub.room_count(),
        "version": VERSION,
    }))
}

#[derive(Deserialize)]
struct CreateRoomRequest {
    room_name: String,
    host_name: String,
    #[serde(default)]
    host_preferences: Option<String>,
    #[serde(default)]
    host_secret_message: Option<String>,
    #[serde(default)]
    exchange_date: Option<String>,
}

#[derive(Deserialize)]
struct JoinRequest {
    room_code: String,
    name: String,
    #[serde(default)]
    preferences: Option<String>,
    #[serde(default)]
    secret_message: Option<String>,
    #[serde(default)]
    exclusions: Vec<String>,
}

#[derive(Deserialize)]
struct StartParams {
    seed: Option<u64>,
}

#[derive(Serialize)]
struct StartResponse {
    message: &'static str,
    participants: Vec<Participant>,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

#[derive(Deserialize)]
struct CreatePollRequest {
    question: String,
    options: Vec<String>,
    creator_name: String,
}

#[derive(Deserialize)]
struct VotePollRequest {
    option: String,
    voter_id: String,
}

fn required(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{field} required")));
    }
    Ok(trimmed.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn create_room(
    State(state): State<AppState>,
    Json(payload): Json<CreateRoomRequest>,
) -> AppResult<(StatusCode, Json<Room>)> {
    let room_name = required(&payload.room_name, "room_name")?;
    let host_name = required(&payload.host_name, "host_name")?;

    let mut host = Participant::new(Uuid::new_v4().to_string(), host_name);
    host.preferences = non_blank(payload.host_preferences);
    host.secret_message = non_blank(payload.host_secret_message);

    let room = state
        .store
        .create_room(room_name, host, non_blank(payload.exchange_date))
        .await;
    info!(room = %room.code, "room created");

    Ok((StatusCode::CREATED, Json(room)))
}

async fn get_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<Room>> {
    let room = state
        .store
        .find_room(&code)
        .await
        .ok_or_else(|| AppError::NotFound("Room not found".into()))?;
    Ok(Json(room))
}

async fn delete_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    state.store.delete_room(&code).await?;
    state
        .hub
        .broadcast_json(&code, &RoomEvent::system("This room has been deleted."));
    let closed = state.hub.close_room(&code);
    info!(room = %code, connections = closed, "room deleted");
    Ok(Json(MessageResponse {
        message: "Room deleted",
    }))
}

async fn join_room(
    State(state): State<AppState>,
    Json(payload): Json<JoinRequest>,
) -> AppResult<Json<Participant>> {
    let code = payload.room_code.trim().to_uppercase();
    let name = required(&payload.name, "name")?;

    let mut participant = Participant::new(Uuid::new_v4().to_string(), name)
        .with_exclusions(payload.exclusions);
    participant.preferences = non_blank(payload.preferences);
    participant.secret_message = non_blank(payload.secret_message);

    let participant = state.store.append_participant(&code, participant).await?;
    info!(room = %code, participant = %participant.id, "participant joined");
    Ok(Json(participant))
}

async fn start_exchange(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(params): Query<StartParams>,
) -> AppResult<Json<StartResponse>> {
    let room = state
        .store
        .find_room(&code)
        .await
        .ok_or_else(|| AppError::NotFound("Room not found".into()))?;
    if room.is_started {
        return Err(AppError::BadRequest("Game already started".into()));
    }

    let mut rng = params
        .seed
        .map(ChaCha8Rng::seed_from_u64)
        .unwrap_or_else(ChaCha8Rng::from_entropy);
    let assignment = santa_core::assign(&room.participants, &mut rng).map_err(|err| {
        warn!(room = %code, %err, "assignment failed");
        AppError::from(err)
    })?;

    let room = state.store.save_assignment(&code, assignment).await?;
    info!(room = %code, participants = room.participants.len(), "exchange started");

    Ok(Json(StartResponse {
        message: "Game started",
        participants: room.participants,
    }))
}

async fn remove_participant(
    State(state): State<AppState>,
    Path((code, participant_id)): Path<(String, String)>,
) -> AppResult<Json<MessageResponse>> {
    let removed = state
        .store
        .remove_participant(&code, &participant_id)
        .await?;
    info!(room = %code, participant = %removed.id, "participant removed");

    state
        .hub
        .broadcast_json(&code, &RoomEvent::participant_removed(&removed));

    Ok(Json(MessageResponse {
        message: "Participant removed",
    }))
}

async fn create_poll(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<CreatePollRequest>,
) -> AppResult<Json<Poll>> {
    let poll = Poll::new(
        Uuid::new_v4().to_string(),
        &payload.question,
        &payload.options,
        payload.creator_name.trim(),
    )?;
    let poll = state.store.add_poll(&code, poll).await?;

    state
        .hub
        .broadcast_json(&code, &RoomEvent::PollCreated { poll: poll.clone() });

    Ok(Json(poll))
}

async fn vote_poll(
    State(state): State<AppState>,
    Path((code, poll_id)): Path<(String, String)>,
    Json(payload): Json<VotePollRequest>,
) -> AppResult<Json<MessageResponse>> {
    let poll = state
        .store
        .record_vote(&code, &poll_id, &payload.voter_id, &payload.option)
        .await?;

    state.hub.broadcast_json(&code, &RoomEvent::poll_voted(poll));

    Ok(Json(MessageResponse {
        message: "Vote recorded",
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((code, user_name)): Path<(String, String)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, code, user_name))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, code: String, user_name: String) {
    if !state.store.contains(&code).await {
        if let Ok(text) = serde_json::to_string(&RoomEvent::system("Room not found")) {
            let _ = socket.send(Message::Text(text)).await;
        }
        let _ = socket.close().await;
        return;
    }

    chat::run(
        socket,
        state.hub.clone(),
        code,
        user_name,
        state.config.queue_capacity,
    )
    .await;
}

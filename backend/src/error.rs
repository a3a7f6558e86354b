use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use santa_core::{AssignError, RoomError};
use serde_json::json;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unprocessable(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<RoomError> for AppError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::ParticipantNotFound => AppError::NotFound("Participant not found".into()),
            RoomError::PollNotFound => AppError::NotFound("Poll not found".into()),
            RoomError::AlreadyStarted => AppError::BadRequest("Game already started".into()),
            RoomError::NameTaken => AppError::Conflict("Name already taken in this room".into()),
            RoomError::AssignmentMismatch => {
                AppError::Conflict("Participants changed while assigning, try again".into())
            }
            RoomError::InvalidPoll | RoomError::InvalidOption => {
                AppError::BadRequest(err.to_string())
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RoomNotFound => AppError::NotFound("Room not found".into()),
            StoreError::Room(err) => err.into(),
        }
    }
}

impl From<AssignError> for AppError {
    fn from(err: AssignError) -> Self {
        match err {
            AssignError::InsufficientParticipants { .. } => {
                AppError::BadRequest("Need at least 2 participants".into())
            }
            AssignError::DuplicateParticipant(_) => AppError::Conflict(err.to_string()),
            AssignError::Infeasible { .. } => {
                AppError::Unprocessable("Cannot satisfy exclusions".into())
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

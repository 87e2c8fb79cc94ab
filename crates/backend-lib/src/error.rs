// ============================
// crates/backend-lib/src/error.rs
// ============================
//! Central error type for the coordination layer.
use quizroom_common::ServerEvent;
use thiserror::Error;

/// Application error taxonomy.
///
/// Only `DuplicateSession` aborts connection setup; every other variant is
/// translated to a user-visible event at the handler boundary and the
/// connection stays up.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Session token already connected")]
    DuplicateSession,

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid room PIN")]
    InvalidRoom,

    #[error("Room expired")]
    RoomExpired,

    #[error("Username taken")]
    UsernameTaken,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Get the user-visible message for this error.
    ///
    /// Infrastructure detail never leaks to clients; `StoreUnavailable` keeps
    /// its own distinct signal rather than being conflated with the rest.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::DuplicateSession => "Already connected",
            AppError::SessionExpired => "Session expired",
            AppError::InvalidRoom => "Invalid room",
            AppError::RoomExpired => "Room expired",
            AppError::UsernameTaken => "Username taken",
            AppError::StoreUnavailable(_) => "Service unavailable",
            AppError::Json(_) => "Internal error",
        }
    }

    /// Translate this error into the event emitted to the issuing client.
    ///
    /// A PIN miss answers on the overloaded `join room` event; everything
    /// else surfaces as `room error`.
    pub fn to_event(&self) -> ServerEvent {
        match self {
            AppError::InvalidRoom => ServerEvent::JoinRoom(
                quizroom_common::JoinRoomReply::Error(self.user_message().to_string()),
            ),
            _ => ServerEvent::RoomError(self.user_message().to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::StoreUnavailable(e.to_string())
    }
}

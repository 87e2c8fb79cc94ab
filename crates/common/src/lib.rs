// ================
// crates/common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between the quiz client and the coordination server.
//! This module defines the WebSocket protocol events and supporting types.
//!
//! Events are adjacently tagged: `{"event": "<name>", "data": <payload>}`.
//! Event names and payload field names match the original wire protocol
//! (`userID`, `questionID`, `isCorrect`, ...), so existing clients keep
//! working unchanged.

use serde::{Deserialize, Serialize};

/// A question record inside a room's deck.
///
/// The coordination layer never interprets question content (correctness is
/// supplied by the client), so the deck is carried as opaque JSON.
pub type Question = serde_json::Value;

/// Events sent from client to server.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Create a room hosted by this user, with the given question deck.
    #[serde(rename = "create room")]
    CreateRoom(Vec<Question>),
    /// Join a room by its 6-digit PIN.
    #[serde(rename = "join room")]
    JoinRoom(String),
    /// Leave the currently joined room.
    #[serde(rename = "leave room")]
    LeaveRoom,
    /// Delete the room hosted by this user.
    #[serde(rename = "delete room")]
    DeleteRoom,
    /// Reset the hosted room's round flags and clear its answers.
    #[serde(rename = "restart round")]
    RestartRound,
    /// Mark the hosted room's round as started.
    #[serde(rename = "round started")]
    RoundStarted,
    /// Mark the hosted room's round as ended.
    #[serde(rename = "round ended")]
    RoundEnded,
    /// Set this user's display name within the current room.
    #[serde(rename = "create username")]
    CreateUsername(String),
    /// Submit an answer for the current round.
    #[serde(rename = "answer")]
    Answer {
        #[serde(rename = "questionID")]
        question_id: String,
        #[serde(rename = "isCorrect")]
        is_correct: bool,
    },
}

/// Events sent from server to client.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Identity assigned or resumed at connection time.
    #[serde(rename = "session")]
    Session(SessionDetails),
    /// The hosted room was created; carries the assigned PIN.
    #[serde(rename = "room created")]
    RoomCreated(String),
    /// Current roster of the room, optionally with the room snapshot
    /// (sent to a joining or reconnecting party as a catch-up, not a diff).
    #[serde(rename = "users")]
    Users {
        users: Vec<RoomUser>,
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<RoomSnapshot>,
    },
    /// Full room state pushed to a reconnecting member.
    #[serde(rename = "room details")]
    RoomDetails(RoomSnapshot),
    /// Join response: the room on success, an error string on a PIN miss.
    /// The event name is overloaded for both directions, as in the original
    /// protocol.
    #[serde(rename = "join room")]
    JoinRoom(JoinRoomReply),
    /// Acknowledgement that the username was persisted.
    #[serde(rename = "create username")]
    CreateUsername(String),
    /// A member's display name changed.
    #[serde(rename = "update username")]
    UpdateUsername {
        #[serde(rename = "userID")]
        user_id: String,
        username: String,
    },
    /// The host reset the round.
    #[serde(rename = "restart round")]
    RestartRound,
    /// The round started.
    #[serde(rename = "round started")]
    RoundStarted,
    /// The round ended.
    #[serde(rename = "round ended")]
    RoundEnded,
    /// An answer was recorded; broadcast verbatim to the room.
    #[serde(rename = "answer")]
    Answer(AnswerRecord),
    /// A member connected or reconnected.
    #[serde(rename = "user connected")]
    UserConnected(RoomUser),
    /// A member disconnected or left; carries the member's `userID`.
    #[serde(rename = "user disconnected")]
    UserDisconnected(String),
    /// A user-visible error notice.
    #[serde(rename = "room error")]
    RoomError(String),
}

/// Payload of the `join room` response event.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum JoinRoomReply {
    /// PIN resolved; full room state for the joiner.
    Room(RoomSnapshot),
    /// PIN miss; user-visible message (`"Invalid room"`).
    Error(String),
}

/// Identity details emitted on connect.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionDetails {
    #[serde(rename = "sessionToken")]
    pub session_token: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Present when this user hosts a live room.
    #[serde(rename = "hostedRoom", skip_serializing_if = "Option::is_none")]
    pub hosted_room: Option<RoomSnapshot>,
    /// Present when this user's room membership survived the reconnect.
    #[serde(rename = "joinedRoomID", skip_serializing_if = "Option::is_none")]
    pub joined_room_id: Option<String>,
}

/// One member of a room as seen in roster and presence events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RoomUser {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub connected: bool,
}

/// Full state of a room as sent to clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoomSnapshot {
    #[serde(rename = "roomID")]
    pub room_id: String,
    #[serde(rename = "roomPIN")]
    pub room_pin: String,
    pub questions: Vec<Question>,
    #[serde(rename = "roundStarted")]
    pub round_started: bool,
    #[serde(rename = "roundEnded")]
    pub round_ended: bool,
    pub answers: Vec<AnswerRecord>,
}

/// One recorded answer.
///
/// Appended to the room's answer log and broadcast as-is; duplicates from the
/// same user for the same question are allowed (last write is appended, not
/// deduplicated).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    #[serde(rename = "questionID")]
    pub question_id: String,
    #[serde(rename = "isCorrect")]
    pub is_correct: bool,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_wire_names() {
        let json = r#"{"event":"answer","data":{"questionID":"q1","isCorrect":true}}"#;
        let parsed: ClientEvent = serde_json::from_str(json).unwrap();
        match parsed {
            ClientEvent::Answer {
                question_id,
                is_correct,
            } => {
                assert_eq!(question_id, "q1");
                assert!(is_correct);
            },
            other => panic!("Expected Answer, got {other:?}"),
        }

        let join: ClientEvent = serde_json::from_str(r#"{"event":"join room","data":"482913"}"#).unwrap();
        assert!(matches!(join, ClientEvent::JoinRoom(pin) if pin == "482913"));

        // unit variants need no data key
        let leave: ClientEvent = serde_json::from_str(r#"{"event":"leave room"}"#).unwrap();
        assert!(matches!(leave, ClientEvent::LeaveRoom));
    }

    #[test]
    fn session_event_field_names() {
        let details = SessionDetails {
            session_token: "tok".to_string(),
            user_id: "uid".to_string(),
            username: None,
            hosted_room: None,
            joined_room_id: Some("room-1".to_string()),
        };
        let json = serde_json::to_value(ServerEvent::Session(details)).unwrap();
        assert_eq!(json["event"], "session");
        assert_eq!(json["data"]["sessionToken"], "tok");
        assert_eq!(json["data"]["userID"], "uid");
        assert_eq!(json["data"]["joinedRoomID"], "room-1");
        // absent optionals are omitted entirely
        assert!(json["data"].get("username").is_none());
        assert!(json["data"].get("hostedRoom").is_none());
    }

    #[test]
    fn join_room_reply_is_room_or_string() {
        let err = ServerEvent::JoinRoom(JoinRoomReply::Error("Invalid room".to_string()));
        let json = serde_json::to_value(err).unwrap();
        assert_eq!(json["data"], "Invalid room");

        let room = RoomSnapshot {
            room_id: "host".to_string(),
            room_pin: "482913".to_string(),
            questions: vec![],
            round_started: false,
            round_ended: false,
            answers: vec![],
        };
        let ok = ServerEvent::JoinRoom(JoinRoomReply::Room(room));
        let json = serde_json::to_value(ok).unwrap();
        assert_eq!(json["data"]["roomPIN"], "482913");
    }
}

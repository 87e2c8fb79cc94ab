// ============================
// crates/backend-lib/src/room_registry.rs
// ============================
//! Room registry: host identity -> room state, with PIN-based discovery.
//!
//! A room lives under `room:<id>` (the id equals the hosting user's `userID`)
//! with its answer log in the `room:<id>:answers` list. The room TTL is
//! refreshed on creation and round restart only, so an idle room expires on
//! its own.
//!
//! Round state machine: `Idle -> Started -> Ended -> Idle` (restart clears the
//! answers as a side effect). There are no transition guards — the host client
//! is trusted to sequence its own commands, and this layer's job is
//! propagation and persistence, not host-intent validation.
use crate::error::AppError;
use crate::store::Store;
use quizroom_common::{AnswerRecord, Question, RoomSnapshot};
use std::time::Duration;

fn room_key(id: &str) -> String {
    format!("room:{id}")
}

fn answers_key(id: &str) -> String {
    format!("room:{id}:answers")
}

#[derive(Clone)]
pub struct RoomRegistry<S> {
    store: S,
    ttl: Duration,
}

impl<S: Store> RoomRegistry<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Resolve a room and its answer log by identity.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<RoomSnapshot>, AppError> {
        let Some(fields) = self.store.get(&room_key(id)).await? else {
            return Ok(None);
        };
        let Some(pin) = fields.get("room_pin") else {
            return Ok(None);
        };
        let questions: Vec<Question> = match fields.get("questions") {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };
        let mut answers = Vec::new();
        for line in self.store.read_list(&answers_key(id)).await? {
            answers.push(serde_json::from_str::<AnswerRecord>(&line)?);
        }
        Ok(Some(RoomSnapshot {
            room_id: id.to_string(),
            room_pin: pin.clone(),
            questions,
            round_started: fields.get("roundStarted").map(String::as_str) == Some("true"),
            round_ended: fields.get("roundEnded").map(String::as_str) == Some("true"),
            answers,
        }))
    }

    /// Resolve a room by its PIN: a linear scan over all room keys, first
    /// match wins. PIN collisions are neither detected nor prevented at
    /// creation; the scan is bounded by TTL-based expiry of stale rooms.
    pub async fn find_by_pin(&self, pin: &str) -> Result<Option<RoomSnapshot>, AppError> {
        for key in self.store.scan("room:").await? {
            // answer lists share the prefix
            if key.ends_with(":answers") {
                continue;
            }
            let Some(id) = key.strip_prefix("room:") else {
                continue;
            };
            if let Some(room) = self.find_by_id(id).await? {
                if room.room_pin == pin {
                    return Ok(Some(room));
                }
            }
        }
        Ok(None)
    }

    /// Persist a new room with idle round flags and an empty answer log.
    pub async fn create(
        &self,
        host_id: &str,
        pin: &str,
        questions: &[Question],
    ) -> Result<(), AppError> {
        let questions_json = serde_json::to_string(questions)?;
        // a previous room under the same host may have left answers behind
        self.store.delete(&answers_key(host_id)).await?;
        self.store
            .set_fields(
                &room_key(host_id),
                &[
                    ("room_pin", pin),
                    ("questions", &questions_json),
                    ("roundStarted", "false"),
                    ("roundEnded", "false"),
                ],
            )
            .await?;
        self.store.expire(&room_key(host_id), self.ttl).await
    }

    /// Remove a room and its answer log.
    pub async fn delete(&self, host_id: &str) -> Result<(), AppError> {
        self.store.delete(&room_key(host_id)).await?;
        self.store.delete(&answers_key(host_id)).await
    }

    /// Reset the round: clear the answers first, then the flags, then refresh
    /// the TTL. An answer in flight between the clear and a participant's
    /// append lands in the new round's log — an accepted race, documented
    /// rather than eliminated.
    pub async fn restart_round(&self, host_id: &str) -> Result<(), AppError> {
        if self.store.get(&room_key(host_id)).await?.is_none() {
            return Err(AppError::RoomExpired);
        }
        self.store.delete(&answers_key(host_id)).await?;
        self.store
            .set_fields(
                &room_key(host_id),
                &[("roundStarted", "false"), ("roundEnded", "false")],
            )
            .await?;
        self.store.expire(&room_key(host_id), self.ttl).await
    }

    pub async fn set_round_started(&self, host_id: &str, started: bool) -> Result<(), AppError> {
        self.set_flag(host_id, "roundStarted", started).await
    }

    pub async fn set_round_ended(&self, host_id: &str, ended: bool) -> Result<(), AppError> {
        self.set_flag(host_id, "roundEnded", ended).await
    }

    async fn set_flag(&self, host_id: &str, name: &str, value: bool) -> Result<(), AppError> {
        if self.store.get(&room_key(host_id)).await?.is_none() {
            return Err(AppError::RoomExpired);
        }
        self.store
            .set_fields(&room_key(host_id), &[(name, if value { "true" } else { "false" })])
            .await
    }

    /// Append an answer to the room's log. Append-only: duplicate submissions
    /// from the same participant for the same question are recorded as-is.
    pub async fn add_answer(&self, room_id: &str, answer: &AnswerRecord) -> Result<(), AppError> {
        let key = answers_key(room_id);
        self.store
            .append_to_list(&key, &serde_json::to_string(answer)?)
            .await?;
        // a fresh list has no TTL yet; give it the room's window
        if self.store.read_list(&key).await?.len() == 1 {
            self.store.expire(&key, self.ttl).await?;
        }
        Ok(())
    }
}

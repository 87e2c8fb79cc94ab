// ============================
// crates/backend-lib/src/coordinator.rs
// ============================
//! Presence coordinator: connection admission and the command handlers that
//! mutate the session and room registries and emit broadcast events.
//!
//! One instance is shared by every connection task. All cross-connection
//! state lives in the store and the hub; read-then-write sequences across a
//! store round-trip are non-atomic, and the races that allows (answer
//! ordering, stale roster snapshots) are accepted. Two races are prevented
//! explicitly: duplicate-session admission and dangling room references,
//! the latter reconciled lazily at connect time.
use crate::error::AppError;
use crate::hub::{ConnId, RoomHub};
use crate::room_registry::RoomRegistry;
use crate::session_registry::{Session, SessionRegistry};
use crate::store::Store;
use quizroom_common::{
    AnswerRecord, ClientEvent, JoinRoomReply, Question, RoomUser, ServerEvent, SessionDetails,
};
use metrics::counter;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-connection state carried by the transport task between commands.
#[derive(Debug, Clone)]
pub struct ConnContext {
    pub conn_id: ConnId,
    pub token: String,
    pub user_id: String,
    pub username: Option<String>,
}

/// Generate a 6-digit room PIN. Not guaranteed unique across live rooms;
/// discovery takes the first match.
fn generate_pin() -> String {
    rand::rng().random_range(100_000u32..=999_999).to_string()
}

pub struct PresenceCoordinator<S> {
    sessions: SessionRegistry<S>,
    rooms: RoomRegistry<S>,
    hub: Arc<RoomHub>,
}

impl<S: Store + Clone> PresenceCoordinator<S> {
    pub fn new(store: S, session_ttl: Duration, room_ttl: Duration) -> Self {
        Self {
            sessions: SessionRegistry::new(store.clone(), session_ttl),
            rooms: RoomRegistry::new(store, room_ttl),
            hub: Arc::new(RoomHub::new()),
        }
    }

    /// Connection admission, run once per new connection before any command.
    ///
    /// Resolves or mints the identity, registers the connection (refusing a
    /// token another live connection holds), emits the `session` event, and
    /// reconciles stale room membership. On a valid surviving membership the
    /// connection is re-subscribed, announced, and sent a catch-up snapshot.
    pub async fn handle_connect(
        &self,
        presented_token: Option<&str>,
        conn_id: ConnId,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Result<ConnContext, AppError> {
        // Cheap refusal before touching the store; the hub registration below
        // closes the race atomically.
        if let Some(token) = presented_token {
            if self.hub.token_connected(token) {
                return Err(AppError::DuplicateSession);
            }
        }

        let existing = match presented_token {
            Some(token) => self.sessions.find_by_token(token).await?,
            None => None,
        };

        let result = match existing {
            Some(session) => {
                self.hub.register(conn_id, &session.token, tx)?;
                self.connect_session(session, conn_id, true).await
            },
            None => {
                // Unknown or absent token: mint a fresh identity. An expired
                // token is not recycled.
                let token = Uuid::new_v4().to_string();
                let user_id = Uuid::new_v4().to_string();
                self.hub.register(conn_id, &token, tx)?;
                match self.sessions.create(&token, &user_id).await {
                    Ok(session) => self.connect_session(session, conn_id, false).await,
                    Err(e) => Err(e),
                }
            },
        };
        if result.is_err() {
            // a registration left behind would refuse this token forever
            self.hub.deregister(conn_id);
        }
        result
    }

    /// Post-admission half of connection setup: resume the session, emit
    /// `session`, reconcile room membership, and restore room presence.
    async fn connect_session(
        &self,
        session: Session,
        conn_id: ConnId,
        resumed: bool,
    ) -> Result<ConnContext, AppError> {
        if resumed {
            self.sessions.resume(&session.token).await?;
            info!(user_id = %session.user_id, "session resumed");
        } else {
            info!(user_id = %session.user_id, "session created");
        }

        let ctx = ConnContext {
            conn_id,
            token: session.token.clone(),
            user_id: session.user_id.clone(),
            username: session.username.clone(),
        };

        let hosted_room = self.rooms.find_by_id(&ctx.user_id).await?;

        // Membership is a weak reference; re-validate and clear it lazily if
        // the room expired or was deleted while this party was away.
        let joined_room = match &session.joined_room_id {
            Some(room_id) => {
                let room = self.rooms.find_by_id(room_id).await?;
                if room.is_none() {
                    debug!(%room_id, "clearing dangling room membership");
                    self.sessions.set_joined_room(&ctx.token, None).await?;
                }
                room
            },
            None => None,
        };

        self.hub.send_to(
            ctx.conn_id,
            ServerEvent::Session(SessionDetails {
                session_token: ctx.token.clone(),
                user_id: ctx.user_id.clone(),
                username: ctx.username.clone(),
                hosted_room,
                joined_room_id: joined_room.as_ref().map(|r| r.room_id.clone()),
            }),
        );

        if let Some(room) = joined_room {
            self.hub.subscribe(&room.room_id, ctx.conn_id);
            self.hub.broadcast(
                &room.room_id,
                &ServerEvent::UserConnected(RoomUser {
                    user_id: ctx.user_id.clone(),
                    username: ctx.username.clone(),
                    connected: true,
                }),
                Some(ctx.conn_id),
            );
            let users = self.roster(&room.room_id).await?;
            self.hub
                .send_to(ctx.conn_id, ServerEvent::Users { users, room: None });
            self.hub.send_to(ctx.conn_id, ServerEvent::RoomDetails(room));
        }

        Ok(ctx)
    }

    /// Dispatch one client command.
    ///
    /// Every handler re-validates the session first; a missing record means
    /// the TTL evicted it while this party was connected, reported uniformly
    /// as `SessionExpired`. Errors are returned to the transport layer for
    /// translation into events — nothing here unwinds the connection.
    pub async fn handle_command(
        &self,
        ctx: &mut ConnContext,
        event: ClientEvent,
    ) -> Result<(), AppError> {
        let session = self
            .sessions
            .find_by_token(&ctx.token)
            .await?
            .ok_or(AppError::SessionExpired)?;

        match event {
            ClientEvent::CreateRoom(questions) => self.create_room(ctx, &questions).await,
            ClientEvent::DeleteRoom => self.delete_room(ctx).await,
            ClientEvent::JoinRoom(pin) => self.join_room(ctx, &session, &pin).await,
            ClientEvent::LeaveRoom => self.leave_room(ctx, &session).await,
            ClientEvent::RestartRound => self.restart_round(ctx).await,
            ClientEvent::RoundStarted => self.set_round_flag(ctx, true).await,
            ClientEvent::RoundEnded => self.set_round_flag(ctx, false).await,
            ClientEvent::CreateUsername(name) => self.create_username(ctx, &session, name).await,
            ClientEvent::Answer {
                question_id,
                is_correct,
            } => self.answer(ctx, &session, question_id, is_correct).await,
        }
    }

    /// Connection drop. Marks the session disconnected (no TTL refresh) and
    /// announces the departure, but never clears membership or display name —
    /// a reconnect restores room presence without rejoining.
    pub async fn handle_disconnect(&self, ctx: &ConnContext) {
        match self.sessions.find_by_token(&ctx.token).await {
            Ok(Some(session)) => {
                if let Err(e) = self.sessions.set_connected(&ctx.token, false).await {
                    warn!(user_id = %ctx.user_id, "failed to mark session disconnected: {e}");
                }
                if let Some(room_id) = session.joined_room_id {
                    self.hub.broadcast(
                        &room_id,
                        &ServerEvent::UserDisconnected(ctx.user_id.clone()),
                        Some(ctx.conn_id),
                    );
                }
            },
            Ok(None) => {},
            Err(e) => warn!(user_id = %ctx.user_id, "disconnect bookkeeping failed: {e}"),
        }
        self.hub.deregister(ctx.conn_id);
        info!(user_id = %ctx.user_id, "disconnected");
    }

    async fn create_room(&self, ctx: &mut ConnContext, questions: &[Question]) -> Result<(), AppError> {
        let pin = generate_pin();
        self.rooms.create(&ctx.user_id, &pin, questions).await?;
        self.hub.subscribe(&ctx.user_id, ctx.conn_id);
        // hosting resets the display name along with membership
        self.sessions
            .set_joined_room_and_username(&ctx.token, Some(&ctx.user_id), None)
            .await?;
        ctx.username = None;
        counter!("room.created").increment(1);
        info!(room_id = %ctx.user_id, %pin, "room created");
        self.hub
            .send_to(ctx.conn_id, ServerEvent::RoomCreated(pin));
        Ok(())
    }

    async fn delete_room(&self, ctx: &mut ConnContext) -> Result<(), AppError> {
        self.rooms.delete(&ctx.user_id).await?;
        self.hub.broadcast(
            &ctx.user_id,
            &ServerEvent::RoomError("Room was closed".to_string()),
            Some(ctx.conn_id),
        );
        self.hub.evict_scope(&ctx.user_id);
        // O(total sessions): every session that referenced the room loses its
        // membership and display name, the host's own included.
        for member in self.sessions.list_all().await? {
            if member.joined_room_id.as_deref() == Some(ctx.user_id.as_str()) {
                self.sessions
                    .set_joined_room_and_username(&member.token, None, None)
                    .await?;
            }
        }
        ctx.username = None;
        counter!("room.deleted").increment(1);
        info!(room_id = %ctx.user_id, "room deleted");
        Ok(())
    }

    async fn join_room(
        &self,
        ctx: &mut ConnContext,
        session: &Session,
        pin: &str,
    ) -> Result<(), AppError> {
        let room = self
            .rooms
            .find_by_pin(pin)
            .await?
            .ok_or(AppError::InvalidRoom)?;
        // the store is authoritative: an eviction on another connection may
        // have cleared the name this context still caches
        ctx.username = session.username.clone();
        self.hub.subscribe(&room.room_id, ctx.conn_id);
        self.sessions
            .set_joined_room(&ctx.token, Some(&room.room_id))
            .await?;

        let users = self.roster(&room.room_id).await?;
        self.hub.send_to(
            ctx.conn_id,
            ServerEvent::Users {
                users,
                room: Some(room.clone()),
            },
        );
        self.hub.send_to(
            ctx.conn_id,
            ServerEvent::JoinRoom(JoinRoomReply::Room(room.clone())),
        );
        self.hub.broadcast(
            &room.room_id,
            &ServerEvent::UserConnected(RoomUser {
                user_id: ctx.user_id.clone(),
                username: ctx.username.clone(),
                connected: true,
            }),
            Some(ctx.conn_id),
        );
        counter!("room.joined").increment(1);
        debug!(room_id = %room.room_id, user_id = %ctx.user_id, "joined room");
        Ok(())
    }

    async fn leave_room(&self, ctx: &mut ConnContext, session: &Session) -> Result<(), AppError> {
        if let Some(room_id) = &session.joined_room_id {
            self.hub.broadcast(
                room_id,
                &ServerEvent::UserDisconnected(ctx.user_id.clone()),
                Some(ctx.conn_id),
            );
            self.hub.unsubscribe(room_id, ctx.conn_id);
        }
        self.sessions
            .set_joined_room_and_username(&ctx.token, None, None)
            .await?;
        ctx.username = None;
        Ok(())
    }

    async fn restart_round(&self, ctx: &ConnContext) -> Result<(), AppError> {
        self.rooms.restart_round(&ctx.user_id).await?;
        self.hub.broadcast(
            &ctx.user_id,
            &ServerEvent::RestartRound,
            Some(ctx.conn_id),
        );
        Ok(())
    }

    /// Round-lifecycle events go to the full room scope, host included, so
    /// every member observes the transition. No transition guards: the host
    /// client is trusted to sequence start and end itself.
    async fn set_round_flag(&self, ctx: &ConnContext, started: bool) -> Result<(), AppError> {
        if started {
            self.rooms.set_round_started(&ctx.user_id, true).await?;
            self.hub
                .broadcast(&ctx.user_id, &ServerEvent::RoundStarted, None);
        } else {
            self.rooms.set_round_ended(&ctx.user_id, true).await?;
            self.hub
                .broadcast(&ctx.user_id, &ServerEvent::RoundEnded, None);
        }
        Ok(())
    }

    async fn create_username(
        &self,
        ctx: &mut ConnContext,
        session: &Session,
        username: String,
    ) -> Result<(), AppError> {
        let proposed = username.trim();
        if let Some(room_id) = &session.joined_room_id {
            // uniqueness is scoped to the current room: trimmed,
            // case-insensitive comparison against every other member
            let taken = self
                .sessions
                .members_of(room_id)
                .await?
                .iter()
                .filter(|member| member.user_id != ctx.user_id)
                .filter_map(|member| member.username.as_deref())
                .any(|existing| existing.trim().eq_ignore_ascii_case(proposed));
            if taken {
                return Err(AppError::UsernameTaken);
            }
        }

        self.sessions.set_username(&ctx.token, &username).await?;
        ctx.username = Some(username.clone());
        self.hub.send_to(
            ctx.conn_id,
            ServerEvent::CreateUsername("created".to_string()),
        );
        if let Some(room_id) = &session.joined_room_id {
            self.hub.broadcast(
                room_id,
                &ServerEvent::UpdateUsername {
                    user_id: ctx.user_id.clone(),
                    username,
                },
                None,
            );
        }
        Ok(())
    }

    /// Record and broadcast an answer. No validation that the question exists
    /// in the deck or that a round is active; correctness is client-supplied.
    async fn answer(
        &self,
        ctx: &ConnContext,
        session: &Session,
        question_id: String,
        is_correct: bool,
    ) -> Result<(), AppError> {
        let room_id = session
            .joined_room_id
            .clone()
            .ok_or(AppError::InvalidRoom)?;
        let record = AnswerRecord {
            question_id,
            is_correct,
            user_id: ctx.user_id.clone(),
            username: session.username.clone(),
        };
        self.rooms.add_answer(&room_id, &record).await?;
        counter!("answer.recorded").increment(1);
        self.hub
            .broadcast(&room_id, &ServerEvent::Answer(record), None);
        Ok(())
    }

    async fn roster(&self, room_id: &str) -> Result<Vec<RoomUser>, AppError> {
        Ok(self
            .sessions
            .members_of(room_id)
            .await?
            .into_iter()
            .map(|member| RoomUser {
                user_id: member.user_id,
                username: member.username,
                connected: member.connected,
            })
            .collect())
    }
}

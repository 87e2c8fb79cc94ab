// ============================
// crates/backend-lib/src/hub.rs
// ============================
//! Connection registry and topic-scoped broadcast.
//!
//! This is the transport-side surface the coordinator relies on: connection
//! registration with token correlation (duplicate tokens refused atomically),
//! scope subscribe/unsubscribe/evict, broadcast-to-scope with optional
//! skip-sender, and targeted delivery. Delivery is non-blocking: a receiver
//! whose buffer is full loses the event (logged), it is never awaited.
use crate::error::AppError;
use dashmap::{mapref::entry::Entry, DashMap};
use quizroom_common::ServerEvent;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Identifies one live transport connection.
pub type ConnId = Uuid;

struct ConnectionEntry {
    token: String,
    tx: mpsc::Sender<ServerEvent>,
}

/// Live connections and their broadcast scopes.
#[derive(Default)]
pub struct RoomHub {
    conns: DashMap<ConnId, ConnectionEntry>,
    by_token: DashMap<String, ConnId>,
    scopes: DashMap<String, HashSet<ConnId>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its session token.
    ///
    /// Refused with `DuplicateSession` while another live connection holds the
    /// same token — the one admission failure that aborts connection setup.
    pub fn register(
        &self,
        conn_id: ConnId,
        token: &str,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Result<(), AppError> {
        match self.by_token.entry(token.to_string()) {
            Entry::Occupied(mut occupied) => {
                if self.conns.contains_key(occupied.get()) {
                    return Err(AppError::DuplicateSession);
                }
                // stale mapping left by a connection that dropped uncleanly
                occupied.insert(conn_id);
            },
            Entry::Vacant(vacant) => {
                vacant.insert(conn_id);
            },
        }
        self.conns.insert(
            conn_id,
            ConnectionEntry {
                token: token.to_string(),
                tx,
            },
        );
        Ok(())
    }

    /// Drop a connection and its scope memberships.
    pub fn deregister(&self, conn_id: ConnId) {
        if let Some((_, entry)) = self.conns.remove(&conn_id) {
            self.by_token
                .remove_if(&entry.token, |_, mapped| *mapped == conn_id);
        }
        self.scopes.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    /// Whether any live connection currently holds this token.
    pub fn token_connected(&self, token: &str) -> bool {
        self.by_token
            .get(token)
            .is_some_and(|conn_id| self.conns.contains_key(&conn_id))
    }

    pub fn subscribe(&self, scope: &str, conn_id: ConnId) {
        self.scopes
            .entry(scope.to_string())
            .or_default()
            .insert(conn_id);
    }

    pub fn unsubscribe(&self, scope: &str, conn_id: ConnId) {
        if let Some(mut members) = self.scopes.get_mut(scope) {
            members.remove(&conn_id);
        }
    }

    /// Detach every connection from the scope at once (room deletion).
    pub fn evict_scope(&self, scope: &str) {
        self.scopes.remove(scope);
    }

    /// Deliver an event to one connection, if it is still live.
    pub fn send_to(&self, conn_id: ConnId, event: ServerEvent) {
        if let Some(entry) = self.conns.get(&conn_id) {
            if let Err(e) = entry.tx.try_send(event) {
                warn!(%conn_id, "dropping event for slow or closed connection: {e}");
            }
        }
    }

    /// Deliver an event to every member of a scope, optionally skipping the
    /// sender's own connection.
    pub fn broadcast(&self, scope: &str, event: &ServerEvent, skip: Option<ConnId>) {
        let targets: Vec<ConnId> = match self.scopes.get(scope) {
            Some(members) => members
                .iter()
                .copied()
                .filter(|id| Some(*id) != skip)
                .collect(),
            None => return,
        };
        for conn_id in targets {
            self.send_to(conn_id, event.clone());
        }
    }
}

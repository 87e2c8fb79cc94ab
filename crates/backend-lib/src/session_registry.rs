// ============================
// crates/backend-lib/src/session_registry.rs
// ============================
//! Session registry: opaque token -> identity, connectivity, room membership.
//!
//! Sessions live under `session:<token>` as a field hash. Every mutation is a
//! partial-field update; fields not mentioned are preserved. The TTL is
//! refreshed only on successful reconnect — it keeps ticking while a session
//! sits disconnected, so abandoned sessions expire on their own.
use crate::error::AppError;
use crate::store::Store;
use std::collections::HashMap;
use std::time::Duration;

/// A participant's persistent identity, independent of any single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub username: Option<String>,
    pub connected: bool,
    /// Weak reference to a room; may dangle after the room expired or was
    /// deleted. Consumers re-validate before trusting it.
    pub joined_room_id: Option<String>,
}

fn session_key(token: &str) -> String {
    format!("session:{token}")
}

/// Empty-string fields are the persisted form of "absent".
fn non_empty(fields: &HashMap<String, String>, name: &str) -> Option<String> {
    fields.get(name).filter(|v| !v.is_empty()).cloned()
}

#[derive(Clone)]
pub struct SessionRegistry<S> {
    store: S,
    ttl: Duration,
}

impl<S: Store> SessionRegistry<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<Session>, AppError> {
        let Some(fields) = self.store.get(&session_key(token)).await? else {
            return Ok(None);
        };
        // a record without an identity is useless; treat it as absent
        let Some(user_id) = non_empty(&fields, "userID") else {
            return Ok(None);
        };
        Ok(Some(Session {
            token: token.to_string(),
            user_id,
            username: non_empty(&fields, "username"),
            connected: fields.get("connected").map(String::as_str) == Some("true"),
            joined_room_id: non_empty(&fields, "joined_room_id"),
        }))
    }

    /// Create a fresh session for a first-contact connection.
    pub async fn create(&self, token: &str, user_id: &str) -> Result<Session, AppError> {
        let key = session_key(token);
        self.store
            .set_fields(&key, &[("userID", user_id), ("connected", "true")])
            .await?;
        self.store.expire(&key, self.ttl).await?;
        Ok(Session {
            token: token.to_string(),
            user_id: user_id.to_string(),
            username: None,
            connected: true,
            joined_room_id: None,
        })
    }

    /// Mark a resumed session connected and refresh its TTL.
    pub async fn resume(&self, token: &str) -> Result<(), AppError> {
        self.set_connected(token, true).await
    }

    /// Flip connectivity. The TTL is refreshed only on reconnect, never on
    /// disconnect.
    pub async fn set_connected(&self, token: &str, connected: bool) -> Result<(), AppError> {
        let key = session_key(token);
        self.store
            .set_fields(&key, &[("connected", if connected { "true" } else { "false" })])
            .await?;
        if connected {
            self.store.expire(&key, self.ttl).await?;
        }
        Ok(())
    }

    pub async fn set_username(&self, token: &str, username: &str) -> Result<(), AppError> {
        self.store
            .set_fields(&session_key(token), &[("username", username)])
            .await
    }

    pub async fn set_joined_room(
        &self,
        token: &str,
        room_id: Option<&str>,
    ) -> Result<(), AppError> {
        self.store
            .set_fields(
                &session_key(token),
                &[("joined_room_id", room_id.unwrap_or(""))],
            )
            .await
    }

    /// Update membership and display name in one field-set, used whenever the
    /// two change together (joining, room deletion eviction).
    pub async fn set_joined_room_and_username(
        &self,
        token: &str,
        room_id: Option<&str>,
        username: Option<&str>,
    ) -> Result<(), AppError> {
        self.store
            .set_fields(
                &session_key(token),
                &[
                    ("joined_room_id", room_id.unwrap_or("")),
                    ("username", username.unwrap_or("")),
                ],
            )
            .await
    }

    /// Every live session. Linear in total session count; acceptable at the
    /// single-room scale this coordinator targets.
    pub async fn list_all(&self) -> Result<Vec<Session>, AppError> {
        let mut sessions = Vec::new();
        for key in self.store.scan("session:").await? {
            let Some(token) = key.strip_prefix("session:") else {
                continue;
            };
            // the scan is snapshot-ish: a key may be gone by the time we read it
            if let Some(session) = self.find_by_token(token).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// Sessions whose membership points at the given room.
    pub async fn members_of(&self, room_id: &str) -> Result<Vec<Session>, AppError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|s| s.joined_room_id.as_deref() == Some(room_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> SessionRegistry<MemoryStore> {
        SessionRegistry::new(MemoryStore::new(), Duration::from_secs(6 * 60 * 60))
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let sessions = registry();
        sessions.create("tok", "u1").await.unwrap();

        let found = sessions.find_by_token("tok").await.unwrap().unwrap();
        assert_eq!(found.user_id, "u1");
        assert!(found.connected);
        assert!(found.username.is_none());
        assert!(found.joined_room_id.is_none());

        assert!(sessions.find_by_token("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_preserves_membership() {
        let sessions = registry();
        sessions.create("tok", "u1").await.unwrap();
        sessions.set_joined_room("tok", Some("room-1")).await.unwrap();

        sessions.resume("tok").await.unwrap();
        sessions.set_connected("tok", false).await.unwrap();

        let found = sessions.find_by_token("tok").await.unwrap().unwrap();
        assert!(!found.connected);
        assert_eq!(found.joined_room_id.as_deref(), Some("room-1"));
    }

    #[tokio::test]
    async fn test_set_connected_is_idempotent() {
        let sessions = registry();
        sessions.create("tok", "u1").await.unwrap();
        sessions.set_username("tok", "Alice").await.unwrap();

        sessions.set_connected("tok", true).await.unwrap();
        let first = sessions.find_by_token("tok").await.unwrap().unwrap();
        sessions.set_connected("tok", true).await.unwrap();
        let second = sessions.find_by_token("tok").await.unwrap().unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_joined_room_and_username_clear_together() {
        let sessions = registry();
        sessions.create("tok", "u1").await.unwrap();
        sessions
            .set_joined_room_and_username("tok", Some("room-1"), Some("Alice"))
            .await
            .unwrap();

        let joined = sessions.find_by_token("tok").await.unwrap().unwrap();
        assert_eq!(joined.joined_room_id.as_deref(), Some("room-1"));
        assert_eq!(joined.username.as_deref(), Some("Alice"));

        sessions
            .set_joined_room_and_username("tok", None, None)
            .await
            .unwrap();
        let cleared = sessions.find_by_token("tok").await.unwrap().unwrap();
        assert!(cleared.joined_room_id.is_none());
        assert!(cleared.username.is_none());
        // identity fields untouched by the partial update
        assert_eq!(cleared.user_id, "u1");
    }

    #[tokio::test]
    async fn test_members_of_filters_by_room() {
        let sessions = registry();
        sessions.create("a", "u1").await.unwrap();
        sessions.create("b", "u2").await.unwrap();
        sessions.create("c", "u3").await.unwrap();
        sessions.set_joined_room("a", Some("room-1")).await.unwrap();
        sessions.set_joined_room("b", Some("room-1")).await.unwrap();
        sessions.set_joined_room("c", Some("room-2")).await.unwrap();

        let mut members: Vec<String> = sessions
            .members_of("room-1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.user_id)
            .collect();
        members.sort();
        assert_eq!(members, vec!["u1", "u2"]);
    }
}

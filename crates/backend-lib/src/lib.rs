// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core coordination layer for the quiz room WebSocket server.
//!
//! The layout follows the data flow: a connection is admitted by the
//! [`coordinator::PresenceCoordinator`], which resolves identity through the
//! [`session_registry::SessionRegistry`], recovers room membership through
//! the [`room_registry::RoomRegistry`], and emits events through the
//! [`hub::RoomHub`]. Both registries persist through the [`store::Store`]
//! adapter, selected at startup.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod room_registry;
pub mod session_registry;
pub mod store;
pub mod ws_router;

use crate::config::Settings;
use crate::coordinator::PresenceCoordinator;
use crate::store::Store;
use std::sync::Arc;

/// Application state shared across all connection handlers.
pub struct AppState<S> {
    /// The presence coordinator; owns the registries and the broadcast hub
    pub coordinator: PresenceCoordinator<S>,
    /// Settings loaded at startup
    pub settings: Arc<Settings>,
}

impl<S: Store + Clone> AppState<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        let coordinator =
            PresenceCoordinator::new(store, settings.session_ttl(), settings.room_ttl());
        Self {
            coordinator,
            settings: Arc::new(settings),
        }
    }
}

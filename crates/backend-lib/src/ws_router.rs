// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
//!
//! One task per connection. The reconnecting client presents its session
//! token as the `session` query parameter; admission runs before any command
//! is accepted. Handler errors are translated to events at this boundary —
//! only a duplicate-session refusal terminates setup outright.
use crate::store::Store;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use quizroom_common::{ClientEvent, ServerEvent};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct WsQuery {
    /// Session token from a previous connection, if the client has one.
    pub session: Option<String>,
}

/// Create the WebSocket router.
pub fn create_router<S: Store + Clone + Send + Sync + 'static>(
    state: Arc<AppState<S>>,
) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::<S>))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler<S: Store + Clone + Send + Sync + 'static>(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, query.session))
}

async fn handle_connection<S: Store + Clone + Send + Sync + 'static>(
    socket: WebSocket,
    state: Arc<AppState<S>>,
    presented_token: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();

    // Events for this client flow through a channel so the coordinator and
    // the hub never touch the socket directly.
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(32);
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!("failed to serialize outbound event: {e}");
                    continue;
                },
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let conn_id = Uuid::new_v4();
    let mut ctx = match state
        .coordinator
        .handle_connect(presented_token.as_deref(), conn_id, tx.clone())
        .await
    {
        Ok(ctx) => ctx,
        Err(e) => {
            // Admission refused. Tell the client why, flush, and drop the
            // connection without entering the command loop.
            warn!("connection refused: {e}");
            let _ = tx.send(e.to_event()).await;
            drop(tx);
            let _ = send_task.await;
            return;
        },
    };
    counter!("ws.connection").increment(1);
    gauge!("ws.active").increment(1.0);

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    counter!("ws.command").increment(1);
                    if let Err(e) = state.coordinator.handle_command(&mut ctx, event).await {
                        debug!(user_id = %ctx.user_id, "command failed: {e}");
                        if tx.send(e.to_event()).await.is_err() {
                            break;
                        }
                    }
                },
                Err(e) => {
                    debug!(user_id = %ctx.user_id, "malformed client event: {e}");
                    if tx
                        .send(ServerEvent::RoomError("Malformed message".to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                },
            },
            Message::Close(_) => break,
            // pings are answered by axum itself
            _ => {},
        }
    }

    // A drop is the only cancellation signal; side effects of the commands
    // already dispatched above have applied regardless.
    state.coordinator.handle_disconnect(&ctx).await;
    counter!("ws.disconnection").increment(1);
    gauge!("ws.active").decrement(1.0);
    drop(tx);
    send_task.abort();
}

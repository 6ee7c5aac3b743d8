//! WebSocket protocol adapter (C14): a persistent, bidirectional alternative
//! to the REST adapter. One upgraded connection per client, authenticated
//! once at handshake, then free to `subscribe`/`unsubscribe` to bus topics
//! and issue `request` frames routed through the same
//! [`crate::router::MessageRouter`] the REST adapter uses.

mod connection;
mod handler;
mod messages;

pub use connection::ConnectionId;
pub use handler::ws_handler;
pub use messages::{ClientFrame, ServerFrame};

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new().route(&state.config.websocket.path, get(ws_handler))
}

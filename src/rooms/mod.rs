mod bridge;
mod connection;
mod history;
mod msg;
mod registry;
mod ws;

use std::time::Duration;

use axum::{Router, routing::get};

use crate::AppState;

pub use bridge::ChatBridge;
pub use connection::Connection;
pub use msg::{ChatCoordinator, HistoryEntry};
pub use registry::RoomRegistry;
pub use ws::ClientFrame;

/// Keepalive policy for chat websockets.
#[derive(Debug, Clone, Copy)]
pub struct ChatSettings {
    /// A connection silent this long is reaped
    pub idle_timeout: Duration,
    pub ping_interval: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            ping_interval: Duration::from_secs(30),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
        .route("/{rental_id}/history", get(history::history))
}

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;
use uuid::Uuid;

use crate::db::{ChatMessage, now_millis};

/// One live websocket, as seen by the registry.
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    sender: mpsc::Sender<Arc<ChatMessage>>,
    pub(super) room: Mutex<Option<Uuid>>,
    last_seen: AtomicI64,
    closed: CancellationToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let room = self.room.try_lock().ok().and_then(|guard| *guard);

        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("room", &room)
            .field("channel_closed", &self.sender.is_closed())
            .field("last_seen", &self.last_seen.load(Ordering::Relaxed))
            .finish()
    }
}

impl Connection {
    pub fn new(user_id: Uuid, sender: mpsc::Sender<Arc<ChatMessage>>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            sender,
            room: Mutex::new(None),
            last_seen: AtomicI64::new(now_millis()),
            closed: CancellationToken::new(),
        }
    }

    /// Queues a message for the writer task without waiting.
    /// Closed or backed-up connections are skipped.
    pub fn deliver(&self, message: Arc<ChatMessage>) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }

        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %self.id, "outbound buffer full, skipping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.sender.is_closed()
    }

    /// Records inbound traffic.
    pub fn touch(&self) {
        self.last_seen.store(now_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let idle = now_millis() - self.last_seen.load(Ordering::Relaxed);
        Duration::from_millis(idle.max(0) as u64)
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once the connection has been closed by either side.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_connections_take_no_messages() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Connection::new(Uuid::now_v7(), tx);
        let message = Arc::new(ChatMessage::system(Uuid::now_v7(), "hi".to_owned()));

        assert!(conn.deliver(message.clone()));
        assert_eq!(rx.try_recv().unwrap().body, "hi");

        conn.close();
        assert!(!conn.is_open());
        assert!(!conn.deliver(message));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_buffer_skips_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(Uuid::now_v7(), tx);
        let message = Arc::new(ChatMessage::system(Uuid::now_v7(), "hi".to_owned()));

        assert!(conn.deliver(message.clone()));
        assert!(!conn.deliver(message));
        assert!(conn.is_open());
    }
}

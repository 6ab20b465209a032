use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::{AppError, AppResult, db::ChatMessage, store::Store};

use super::RoomRegistry;

const MAX_BODY_CHARS: usize = 2000;

/// A history row: the message plus its sender's username.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub sender_name: Option<String>,
}

/// Persists chat messages and fans them out to the room.
#[derive(Clone, Debug)]
pub struct ChatCoordinator {
    store: Store,
    registry: RoomRegistry,
}

impl ChatCoordinator {
    pub fn new(store: Store, registry: RoomRegistry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// A user message in a rental's chat. The receiver is the other party of the rental.
    pub async fn post(&self, sender_id: Uuid, rental_id: Uuid, body: &str) -> AppResult<Arc<ChatMessage>> {
        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::validation("message body is empty"));
        }
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(AppError::validation(format!(
                "message body is longer than {MAX_BODY_CHARS} characters"
            )));
        }

        let bike = self
            .store
            .bike(rental_id)
            .await?
            .ok_or_else(|| AppError::not_found("rental not found"))?;
        let receiver_id = if bike.owner_id == sender_id {
            bike.rented_by
        } else {
            Some(bike.owner_id)
        };

        let body = body.to_owned();
        self.publish(rental_id, move || {
            ChatMessage::from_user(rental_id, sender_id, receiver_id, body)
        })
        .await
    }

    /// A message attributed to nobody, e.g. a lifecycle notice.
    pub async fn post_system(&self, rental_id: Uuid, body: String) -> AppResult<Arc<ChatMessage>> {
        self.publish(rental_id, move || ChatMessage::system(rental_id, body))
            .await
    }

    pub async fn history(&self, rental_id: Uuid) -> AppResult<Vec<HistoryEntry>> {
        let rows = self.store.chat_history(rental_id).await?;
        Ok(rows
            .into_iter()
            .map(|(message, sender_name)| HistoryEntry { message, sender_name })
            .collect())
    }

    /// Stamps, stores and broadcasts under the room's sequencer so every
    /// member sees the room's messages in history order.
    async fn publish(&self, rental_id: Uuid, build: impl FnOnce() -> ChatMessage) -> AppResult<Arc<ChatMessage>> {
        let sent = self.publish_in_turn(rental_id, build).await;
        self.registry.release_sequencer(rental_id);
        sent
    }

    async fn publish_in_turn(&self, rental_id: Uuid, build: impl FnOnce() -> ChatMessage) -> AppResult<Arc<ChatMessage>> {
        let sequencer = self.registry.sequencer(rental_id);
        let _turn = sequencer.lock().await;

        let message = build();
        self.store.insert_chat_message(&message).await?;

        let message = Arc::new(message);
        let delivered = self.registry.broadcast(rental_id, message.clone());
        debug!(%rental_id, message_id = %message.id, system = message.system, delivered, "chat message sent");
        Ok(message)
    }
}

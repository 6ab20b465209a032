use async_trait::async_trait;

use crate::events::{Event, EventAction, EventHandler};

use super::ChatCoordinator;

/// Posts lifecycle events into the rental's chat as system messages.
pub struct ChatBridge {
    chat: ChatCoordinator,
}

impl ChatBridge {
    pub fn new(chat: ChatCoordinator) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl EventHandler for ChatBridge {
    fn name(&self) -> &str {
        "chat-bridge"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        // `verified` already announces the listing
        if event.action == EventAction::Added {
            return Ok(());
        }

        self.chat
            .post_system(event.item_id, event.message.clone())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rooms::RoomRegistry, store::Store};
    use uuid::Uuid;

    #[tokio::test]
    async fn each_event_becomes_one_system_message() {
        let store = Store::in_memory().await.unwrap();
        let chat = ChatCoordinator::new(store, RoomRegistry::new());
        let bridge = ChatBridge::new(chat.clone());
        let rental = Uuid::now_v7();

        bridge
            .handle(&Event::new(EventAction::Rented, rental, Some(Uuid::now_v7()), "R15 was rented"))
            .await
            .unwrap();
        bridge
            .handle(&Event::new(EventAction::Added, rental, None, "R15 is listed"))
            .await
            .unwrap();

        let history = chat.history(rental).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].message.system);
        assert_eq!(history[0].message.sender_id, None);
        assert_eq!(history[0].message.body, "R15 was rented");
    }
}

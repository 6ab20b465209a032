use std::{panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Channel carrying bike lifecycle events.
pub const BIKE_EVENTS: &str = "bike_events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Added,
    Verified,
    Rented,
    Returned,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub action: EventAction,
    pub item_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Event {
    pub fn new(action: EventAction, item_id: Uuid, actor_id: Option<Uuid>, message: impl Into<String>) -> Self {
        Self {
            action,
            item_id,
            actor_id,
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Where lifecycle operations send their events. They never learn who consumes them.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    fn name(&self) -> &str;
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

struct Subscriber {
    name: String,
    tx: mpsc::UnboundedSender<Arc<Event>>,
}

/// In-process publish/subscribe bus.
///
/// Each subscriber owns a queue and a dispatch task, so a publisher never
/// waits on a handler, events reach a subscriber in publish order, and a
/// failing or panicking handler only loses its own event.
#[derive(Clone)]
pub struct EventBus {
    channels: Arc<DashMap<String, Vec<Subscriber>>>,
    shutdown: CancellationToken,
}

impl EventBus {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            shutdown,
        }
    }

    pub fn subscribe(&self, channel: &str, handler: Arc<dyn EventHandler>) -> JoinHandle<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = handler.name().to_owned();

        self.channels
            .entry(channel.to_owned())
            .or_default()
            .push(Subscriber { name: name.clone(), tx });

        debug!(channel, subscriber = %name, "subscribed");
        tokio::spawn(dispatch(handler, rx, self.shutdown.clone()))
    }

    /// Fire-and-forget. Returns how many subscribers the event was handed to.
    pub fn publish(&self, channel: &str, event: Event) -> usize {
        let Some(subscribers) = self.channels.get(channel) else {
            debug!(channel, action = ?event.action, "no subscribers");
            return 0;
        };

        let event = Arc::new(event);
        let mut handed = 0;
        for subscriber in subscribers.iter() {
            if subscriber.tx.send(event.clone()).is_ok() {
                handed += 1;
            } else {
                warn!(channel, subscriber = %subscriber.name, "subscriber has stopped, event not delivered");
            }
        }
        handed
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |subs| subs.len())
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: Event) {
        self.publish(BIKE_EVENTS, event);
    }
}

async fn dispatch(
    handler: Arc<dyn EventHandler>,
    mut rx: mpsc::UnboundedReceiver<Arc<Event>>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match AssertUnwindSafe(handler.handle(&event)).catch_unwind().await {
            Ok(Ok(())) => debug!(subscriber = handler.name(), action = ?event.action, item_id = %event.item_id, "event handled"),
            Ok(Err(err)) => warn!(
                subscriber = handler.name(),
                action = ?event.action,
                item_id = %event.item_id,
                error = %err,
                "event subscriber failed"
            ),
            Err(_) => error!(
                subscriber = handler.name(),
                action = ?event.action,
                item_id = %event.item_id,
                "event subscriber panicked"
            ),
        }
    }
    debug!(subscriber = handler.name(), "event dispatcher stopped");
}

use std::{fmt, sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::ChatMessage;

use super::Connection;

/// Live chat connections and the rental rooms they have joined.
///
/// Room membership is mutated through `DashMap` entries, so concurrent
/// joins and leaves on one room serialize on that room's shard.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    /// Connection id to connection
    connections: Arc<DashMap<Uuid, Arc<Connection>>>,
    /// Rental id to member connection ids, in join order
    rooms: Arc<DashMap<Uuid, Vec<Uuid>>>,
    /// Per-room lock ordering persist-then-broadcast
    sequencers: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("connection_count", &self.connections.len())
            .field("room_count", &self.rooms.len())
            .finish()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Arc<Connection>) {
        self.connections.insert(connection.id, connection);
    }

    /// Forgets a connection and drops it from its room.
    pub fn unregister(&self, conn_id: Uuid) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(&conn_id)?;
        let room = connection
            .room
            .lock()
            .map(|mut room| room.take())
            .unwrap_or_default();
        if let Some(room) = room {
            self.leave_room(room, conn_id);
        }
        Some(connection)
    }

    /// Puts a connection into `rental_id`'s room, leaving any room it was in.
    /// Returns the room it left.
    pub fn join(&self, conn_id: Uuid, rental_id: Uuid) -> Option<Uuid> {
        let connection = self.connection(conn_id)?;
        self.join_connection(&connection, rental_id)
    }

    fn join_connection(&self, connection: &Connection, rental_id: Uuid) -> Option<Uuid> {
        let conn_id = connection.id;
        let Ok(mut room) = connection.room.lock() else {
            return None;
        };

        let previous = room.replace(rental_id);
        match previous {
            Some(previous) if previous == rental_id => return None,
            Some(previous) => self.leave_room(previous, conn_id),
            None => {}
        }

        self.rooms.entry(rental_id).or_default().push(conn_id);

        // unregistered since the lookup: its room was already taken, so undo here
        if !self.connections.contains_key(&conn_id) {
            room.take();
            self.leave_room(rental_id, conn_id);
            return None;
        }
        previous
    }

    fn leave_room(&self, rental_id: Uuid, conn_id: Uuid) {
        if let Some(mut members) = self.rooms.get_mut(&rental_id) {
            members.retain(|id| *id != conn_id);
        }

        if self
            .rooms
            .remove_if(&rental_id, |_, members| members.is_empty())
            .is_some()
        {
            // the sequencer goes with the room unless a sender holds it
            self.sequencers
                .remove_if(&rental_id, |_, sequencer| Arc::strong_count(sequencer) == 1);
            debug!(%rental_id, "room emptied");
        }
    }

    pub fn connection(&self, conn_id: Uuid) -> Option<Arc<Connection>> {
        self.connections.get(&conn_id).map(|c| c.clone())
    }

    pub fn room_of(&self, conn_id: Uuid) -> Option<Uuid> {
        let connection = self.connection(conn_id)?;
        connection.room.lock().ok().and_then(|room| *room)
    }

    pub fn members(&self, rental_id: Uuid) -> Vec<Arc<Connection>> {
        self.rooms
            .get(&rental_id)
            .map(|room| {
                room.iter()
                    .filter_map(|conn_id| self.connection(*conn_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Hands `message` to every open member of the room. Returns how many took it.
    pub fn broadcast(&self, rental_id: Uuid, message: Arc<ChatMessage>) -> usize {
        self.members(rental_id)
            .into_iter()
            .filter(|conn| conn.is_open())
            .filter(|conn| conn.deliver(message.clone()))
            .count()
    }

    pub fn sequencer(&self, rental_id: Uuid) -> Arc<Mutex<()>> {
        self.sequencers.entry(rental_id).or_default().clone()
    }

    /// Drops the sequencer of a room that no longer exists, unless a sender
    /// still holds it. Call after dropping your own handle.
    pub fn release_sequencer(&self, rental_id: Uuid) {
        self.sequencers.remove_if(&rental_id, |_, sequencer| {
            Arc::strong_count(sequencer) == 1 && !self.rooms.contains_key(&rental_id)
        });
    }

    pub fn sequencer_count(&self) -> usize {
        self.sequencers.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Closes and forgets connections that went quiet or already closed.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let stale: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|conn| !conn.is_open() || conn.idle_for() >= max_idle)
            .map(|conn| conn.id)
            .collect();

        for conn_id in &stale {
            if let Some(conn) = self.unregister(*conn_id) {
                conn.close();
                info!(%conn_id, user_id = %conn.user_id, "reaped idle chat connection");
            }
        }
        stale.len()
    }

    pub fn spawn_reaper(&self, every: Duration, max_idle: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        registry.reap_idle(max_idle);
                    }
                }
            }
            debug!("room reaper stopped");
        })
    }

    /// Closes every connection and empties the registry.
    pub fn drain(&self) {
        let count = self.connections.len();
        for conn in self.connections.iter() {
            conn.close();
        }
        self.connections.clear();
        self.rooms.clear();
        self.sequencers.clear();
        info!(count, "chat connections drained");
    }
}

//! Per-room fan-out of server-push events.
//!
//! One `tokio::sync::broadcast` channel per room, created lazily on the
//! first subscription. Publishing to a room nobody watches is a no-op.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use ephemera_protocol::{Event, RoomName};
use tokio::sync::broadcast;

use crate::HubConfig;

/// Routes [`Event`]s to every connection subscribed to a room.
pub struct RoomHub {
    channels: RwLock<HashMap<RoomName, broadcast::Sender<Event>>>,
    config: HubConfig,
}

impl RoomHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Returns a receiver that sees every event published to `room`
    /// from now on.
    pub fn subscribe(&self, room: &RoomName) -> broadcast::Receiver<Event> {
        // The map only holds channel handles; a panic elsewhere cannot
        // leave it half-updated, so a poisoned lock is still usable.
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(self.config.channel_capacity).0)
            .subscribe()
    }

    /// Sends `event` to the room's subscribers and returns how many
    /// received it.
    ///
    /// Never blocks, so callers may publish while holding their own table
    /// lock. Subscribers see events in the order they were published.
    pub fn publish(&self, room: &RoomName, event: Event) -> usize {
        let channels = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match channels.get(room) {
            // `send` only fails when every receiver is gone.
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, room: &RoomName) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drops channels with no receivers left. Returns how many.
    pub fn prune(&self) -> usize {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

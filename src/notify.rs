use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Transition;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for transition notifications, one channel per room or
/// asset (location tickets are keyed by their own id).
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Transition>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to transitions for an entity. Creates the channel if needed.
    pub fn subscribe(&self, key: Ulid) -> broadcast::Receiver<Transition> {
        let sender = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, key: Ulid, transition: &Transition) {
        if let Some(sender) = self.channels.get(&key) {
            let _ = sender.send(transition.clone());
        }
    }

    /// Remove a channel.
    pub fn remove(&self, key: &Ulid) {
        self.channels.remove(key);
    }
}

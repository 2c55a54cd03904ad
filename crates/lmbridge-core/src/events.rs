//! Discovery notifications.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::ModelPool;

/// Broadcast channel capacity for discovery events.
const CHANNEL_CAPACITY: usize = 64;

/// Something the discovery service wants observers to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// A new pool was swapped in.
    PoolRefreshed {
        total: usize,
        primary: usize,
        secondary: usize,
        fallback: usize,
        unhealthy: usize,
    },
    /// A discovery or health cycle could not reach the backend.
    DiscoveryFailed { message: String },
    /// A known model's liveness flipped.
    HealthChanged { model_id: String, healthy: bool },
}

impl DiscoveryEvent {
    #[must_use]
    pub fn refreshed(pool: &ModelPool) -> Self {
        Self::PoolRefreshed {
            total: pool.len(),
            primary: pool.primary.len(),
            secondary: pool.secondary.len(),
            fallback: pool.fallback.len(),
            unhealthy: pool.unhealthy.len(),
        }
    }
}

/// Fan-out of discovery events to any number of subscribers.
#[derive(Debug)]
pub struct DiscoveryEvents {
    sender: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryEvents {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Send an event; dropped silently when nobody listens.
    pub fn publish(&self, event: DiscoveryEvent) {
        if self.sender.receiver_count() > 0 {
            debug!(?event, "Publishing discovery event");
            let _ = self.sender.send(event);
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.sender.subscribe()
    }
}

impl Default for DiscoveryEvents {
    fn default() -> Self {
        Self::new()
    }
}

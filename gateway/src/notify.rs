//! Broadcast bus for target lifecycle notifications
//!
//! Every code path that persists a target mutation publishes the resulting
//! [`TargetDiscovery`] events here explicitly. The bus is a plain
//! `tokio::sync::broadcast` channel: subscribers that lag are dropped by
//! the channel, and publishing with no subscribers is a no-op.

use tokio::sync::broadcast;
use tracing::debug;
use vahti_core::TargetDiscovery;

/// Default channel capacity before lagging subscribers start missing events
const DEFAULT_CAPACITY: usize = 256;

/// Pub/sub fan-out for [`TargetDiscovery`] events
#[derive(Clone)]
pub struct DiscoveryBus {
    tx: broadcast::Sender<TargetDiscovery>,
}

impl DiscoveryBus {
    /// Create a bus with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with an explicit buffer capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<TargetDiscovery> {
        self.tx.subscribe()
    }

    /// Publish a batch of events in order
    pub fn publish(&self, events: impl IntoIterator<Item = TargetDiscovery>) {
        for event in events {
            debug!(kind = ?event.kind, target = %event.target.connect_url, "Target discovery event");
            // A send error only means nobody is listening
            let _ = self.tx.send(event);
        }
    }
}

impl Default for DiscoveryBus {
    fn default() -> Self {
        Self::new()
    }
}

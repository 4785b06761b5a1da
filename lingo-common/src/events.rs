//! Event types for the Lingo sync event system
//!
//! Provides the shared `SyncEvent` definitions and an `EventBus` over
//! `tokio::sync::broadcast`. Data sources emit lifecycle events here so that
//! diagnostics, UI banners or session logging can react without holding a
//! reference to the data source itself.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Sync lifecycle events
///
/// Serialized with an internal `type` tag so they can be forwarded as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// A new remote subscription was registered
    SubscriptionStarted {
        /// Data domain ("history", "friends", "settings")
        domain: String,
        user_id: String,
        subscription_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// `start_observing` matched the active subscription and reused it
    SubscriptionReused {
        domain: String,
        user_id: String,
        subscription_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A remote snapshot replaced the cached value
    SnapshotApplied {
        domain: String,
        subscription_id: Uuid,
        /// Documents in the snapshot
        document_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Subscription failed to register or pushed an error
    ///
    /// NOTE: Cached data is retained; only the error flag changes.
    SubscriptionFailed {
        domain: String,
        subscription_id: Option<Uuid>,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Subscription cancelled (logout, user change or parameter change)
    SubscriptionStopped {
        domain: String,
        subscription_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One-off aggregate recomputed from the full collection
    AggregateRefreshed {
        domain: String,
        user_id: String,
        /// Distinct keys in the aggregate
        key_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Aggregate refresh failed; previous aggregate kept
    AggregateRefreshFailed {
        domain: String,
        user_id: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SyncEvent {
    /// Domain the event belongs to
    pub fn domain(&self) -> &str {
        match self {
            SyncEvent::SubscriptionStarted { domain, .. }
            | SyncEvent::SubscriptionReused { domain, .. }
            | SyncEvent::SnapshotApplied { domain, .. }
            | SyncEvent::SubscriptionFailed { domain, .. }
            | SyncEvent::SubscriptionStopped { domain, .. }
            | SyncEvent::AggregateRefreshed { domain, .. }
            | SyncEvent::AggregateRefreshFailed { domain, .. } => domain,
        }
    }
}

/// Central event distribution bus
///
/// Cloning is cheap; clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers drop old events
    ///
    /// # Examples
    ///
    /// ```
    /// use lingo_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SyncEvent,
    ) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

//! Message types for the Coordinator

use std::fmt;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Internal requests to the Coordinator task
#[derive(Debug)]
pub(crate) enum CastRequest<T> {
    /// Register a new subscriber sink
    ///
    /// `left` is cancelled once the subscriber is no longer registered.
    Join {
        id: SubscriptionId,
        tx: mpsc::Sender<T>,
        left: CancellationToken,
    },

    /// Remove a subscriber and close its sink once drained
    Leave { id: SubscriptionId },

    /// Fan a message out to every registered subscriber
    Cast { msg: T },

    /// Get current metrics
    GetMetrics {
        reply_tx: oneshot::Sender<BroadcasterMetrics>,
    },

    /// Stop accepting requests, drain and close every sink
    Shutdown,
}

/// Broadcaster metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcasterMetrics {
    /// Subscribers currently registered
    pub subscribers: usize,
    /// Delivery attempts in flight against registered subscribers
    pub outstanding: usize,
    pub joins: u64,
    pub leaves: u64,
    /// Subscribers removed because their consumer dropped the stream
    pub pruned: u64,
    pub casts: u64,
    /// Casts that reached the coordinator after shutdown and went nowhere
    pub casts_discarded: u64,
    pub deliveries_attempted: u64,
    pub deliveries_completed: u64,
    /// Attempts that timed out or found the consumer gone
    pub deliveries_dropped: u64,
}

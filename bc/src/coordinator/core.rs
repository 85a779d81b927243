//! Main Coordinator task implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::messages::{BroadcasterMetrics, CastRequest, SubscriptionId};
use super::subscriber::{DeliveryStats, Subscriber};
use crate::config::BroadcasterConfig;

/// The Coordinator owns the subscriber registry and serializes every change to it
pub(crate) struct Coordinator<T> {
    wait_time: Duration,
    tx: mpsc::Sender<CastRequest<T>>,
    rx: mpsc::Receiver<CastRequest<T>>,
    /// Cancelled once the coordinator has stopped
    finished: CancellationToken,
    stats: Arc<DeliveryStats>,
}

impl<T: Clone + Send + 'static> Coordinator<T> {
    /// Create a new Coordinator with the given configuration
    pub(crate) fn new(config: &BroadcasterConfig, finished: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(config.event_buffer);
        Self {
            wait_time: config.wait_time(),
            tx,
            rx,
            finished,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    /// Get a sender for the facade
    pub(crate) fn sender(&self) -> mpsc::Sender<CastRequest<T>> {
        self.tx.clone()
    }

    /// Run the Coordinator task
    ///
    /// This consumes the Coordinator and runs until shutdown is requested or
    /// every sender is gone.
    pub(crate) async fn run(self) {
        let Self {
            wait_time,
            tx,
            mut rx,
            finished,
            stats,
        } = self;
        // Only external senders may keep the queue open
        drop(tx);

        let mut registry: HashMap<SubscriptionId, Subscriber<T>> = HashMap::new();
        let mut metrics = BroadcasterMetrics::default();

        info!(?wait_time, "Coordinator started");

        while let Some(req) = rx.recv().await {
            match req {
                CastRequest::Join { id, tx, left } => {
                    debug!(%id, "Registering subscriber");
                    registry.insert(id, Subscriber::new(id, tx, left));
                    metrics.joins += 1;
                }

                CastRequest::Leave { id } => match registry.remove(&id) {
                    Some(sub) => {
                        debug!(%id, outstanding = sub.outstanding(), "Unregistering subscriber");
                        sub.spawn_close();
                        metrics.leaves += 1;
                    }
                    None => debug!(%id, "Leave for unknown subscriber ignored"),
                },

                CastRequest::Cast { msg } => {
                    let before = registry.len();
                    registry.retain(|_, sub| {
                        if sub.is_disconnected() {
                            sub.detach();
                            return false;
                        }
                        true
                    });
                    let pruned = before - registry.len();
                    if pruned > 0 {
                        debug!(pruned, remaining = registry.len(), "Pruned disconnected subscribers");
                        metrics.pruned += pruned as u64;
                    }

                    debug!(subscribers = registry.len(), "Broadcasting message");
                    metrics.casts += 1;
                    for sub in registry.values() {
                        sub.deliver(msg.clone(), wait_time, &stats);
                        metrics.deliveries_attempted += 1;
                    }
                }

                CastRequest::GetMetrics { reply_tx } => {
                    let _ = reply_tx.send(snapshot(&metrics, &registry, &stats));
                }

                CastRequest::Shutdown => {
                    info!(subscribers = registry.len(), "Coordinator shutting down");
                    break;
                }
            }
        }

        // Refuse anything that was queued behind the shutdown
        rx.close();
        while let Some(req) = rx.recv().await {
            match req {
                CastRequest::Join { id, tx, left } => {
                    debug!(%id, "Join after shutdown, closing sink");
                    left.cancel();
                    drop(tx);
                }
                CastRequest::Cast { .. } => {
                    debug!("Cast after shutdown discarded");
                    metrics.casts_discarded += 1;
                }
                CastRequest::GetMetrics { reply_tx } => {
                    let _ = reply_tx.send(snapshot(&metrics, &registry, &stats));
                }
                CastRequest::Leave { .. } | CastRequest::Shutdown => {}
            }
        }

        for (_, sub) in registry.drain() {
            debug!(id = %sub.id(), "Closing subscriber on shutdown");
            sub.spawn_close();
        }

        finished.cancel();
        info!("Coordinator stopped");
    }
}

fn snapshot<T: Send + 'static>(
    metrics: &BroadcasterMetrics,
    registry: &HashMap<SubscriptionId, Subscriber<T>>,
    stats: &DeliveryStats,
) -> BroadcasterMetrics {
    BroadcasterMetrics {
        subscribers: registry.len(),
        outstanding: registry.values().map(|sub| sub.outstanding()).sum(),
        deliveries_completed: stats.completed(),
        deliveries_dropped: stats.dropped(),
        ..metrics.clone()
    }
}

//! Broadcaster - public interface to the Coordinator

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::core::Coordinator;
use super::messages::{BroadcasterMetrics, CastRequest, SubscriptionId};
use super::subscription::Subscription;
use super::watcher::spawn_watcher;
use crate::config::BroadcasterConfig;
use crate::error::{BroadcastError, BroadcastResult};

/// Fan-out broadcaster
///
/// Cheap to clone; every clone drives the same coordinator and shares one
/// Running/Finished state. Dropping every clone without calling
/// [`close`](Self::close) shuts the coordinator down the same way.
#[derive(Clone)]
pub struct Broadcaster<T> {
    /// Sender to the Coordinator task
    tx: mpsc::Sender<CastRequest<T>>,

    /// Set exactly once by `close`
    closed: Arc<AtomicBool>,

    /// Held shared by `cast` while it enqueues, exclusively by `close`
    gate: Arc<RwLock<()>>,

    /// Cancelled when the broadcaster finishes
    finished: CancellationToken,

    wait_time: Duration,
    sink_buffer: usize,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Create a broadcaster and spawn its coordinator
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: BroadcasterConfig) -> BroadcastResult<Self> {
        debug!(?config, "Broadcaster::new: called");
        config.validate()?;

        let finished = CancellationToken::new();
        let coord = Coordinator::new(&config, finished.clone());
        let tx = coord.sender();
        tokio::spawn(coord.run());

        Ok(Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(RwLock::new(())),
            finished,
            wait_time: config.wait_time(),
            sink_buffer: config.sink_buffer,
        })
    }

    /// Subscribe to broadcast messages
    ///
    /// Returns once the coordinator has accepted the subscription. When `done`
    /// is cancelled the subscription is removed; messages already cast to it
    /// are still attempted. With `None` the subscription lasts until the
    /// broadcaster closes. After close the returned stream is already closed.
    pub async fn subscribe(&self, done: Option<CancellationToken>) -> Subscription<T> {
        let id = SubscriptionId::new();
        debug!(%id, has_done = done.is_some(), "Broadcaster::subscribe: called");
        let (tx, rx) = mpsc::channel(self.sink_buffer);
        let left = self.finished.child_token();

        if self.is_closed() {
            debug!(%id, "Broadcaster::subscribe: already closed");
            return Subscription::new(id, rx);
        }

        let joined = tokio::select! {
            biased;
            _ = self.finished.cancelled() => false,
            res = self.tx.send(CastRequest::Join { id, tx, left: left.clone() }) => res.is_ok(),
        };

        if !joined {
            debug!(%id, "Broadcaster::subscribe: finished before join");
            return Subscription::new(id, rx);
        }

        if let Some(done) = done {
            spawn_watcher(id, done, left, self.tx.downgrade());
        }

        debug!(%id, "Broadcaster::subscribe: joined");
        Subscription::new(id, rx)
    }

    /// Broadcast a message to every current subscriber
    ///
    /// Returns once the coordinator has accepted the message, not when it has
    /// been delivered. Subscribers that do not take it within the wait time
    /// miss it silently. A cast that returns `Ok` is always queued ahead of
    /// the shutdown issued by a concurrent `close`.
    pub async fn cast(&self, msg: T) -> BroadcastResult<()> {
        debug!("Broadcaster::cast: called");
        let _gate = self.gate.read().await;
        if self.is_closed() {
            return Err(BroadcastError::AlreadyClosed);
        }

        self.tx
            .send(CastRequest::Cast { msg })
            .await
            .map_err(|_| BroadcastError::AlreadyClosed)?;

        debug!("Broadcaster::cast: sent");
        Ok(())
    }

    /// Close the broadcaster
    ///
    /// Every stream ends once its in-flight deliveries finish. Only the first
    /// call succeeds; later calls return [`BroadcastError::AlreadyClosed`].
    pub async fn close(&self) -> BroadcastResult<()> {
        debug!("Broadcaster::close: called");
        let _gate = self.gate.write().await;
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Broadcaster::close: already closed");
            return Err(BroadcastError::AlreadyClosed);
        }

        // The coordinator may already be gone if every other handle was dropped
        if self.tx.send(CastRequest::Shutdown).await.is_err() {
            debug!("Broadcaster::close: coordinator already stopped");
        }

        debug!("Broadcaster::close: shutdown sent");
        Ok(())
    }

    /// Get current broadcaster metrics
    pub async fn metrics(&self) -> BroadcastResult<BroadcasterMetrics> {
        debug!("Broadcaster::metrics: called");
        if self.is_closed() {
            return Err(BroadcastError::AlreadyClosed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CastRequest::GetMetrics { reply_tx })
            .await
            .map_err(|_| BroadcastError::AlreadyClosed)?;

        reply_rx.await.map_err(|_| BroadcastError::AlreadyClosed)
    }

    /// True once `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until the coordinator has stopped
    ///
    /// Resolves after `close` has been processed and every remaining sink has
    /// been handed off for closing.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Time each delivery attempt waits before dropping a message
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = BroadcasterConfig {
            wait_time_ms: 0,
            ..Default::default()
        };
        let result = Broadcaster::<String>::new(config);
        assert!(matches!(result, Err(BroadcastError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_close_twice_fails() {
        let bc = Broadcaster::<u32>::new(BroadcasterConfig::default()).unwrap();
        assert!(!bc.is_closed());

        bc.close().await.unwrap();
        assert!(bc.is_closed());
        assert_eq!(bc.close().await, Err(BroadcastError::AlreadyClosed));
        assert_eq!(bc.cast(1).await, Err(BroadcastError::AlreadyClosed));
        assert_eq!(bc.metrics().await, Err(BroadcastError::AlreadyClosed));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let bc = Broadcaster::<u32>::new(BroadcasterConfig::default()).unwrap();
        let other = bc.clone();

        other.close().await.unwrap();
        assert!(bc.is_closed());
        assert_eq!(bc.close().await, Err(BroadcastError::AlreadyClosed));
    }

    #[tokio::test]
    async fn test_metrics_track_subscribers() {
        let bc = Broadcaster::<u32>::new(BroadcasterConfig::default()).unwrap();
        let _a = bc.subscribe(None).await;
        let _b = bc.subscribe(None).await;

        let metrics = bc.metrics().await.unwrap();
        assert_eq!(metrics.subscribers, 2);
        assert_eq!(metrics.joins, 2);
        assert_eq!(bc.wait_time(), Duration::from_secs(1));

        bc.close().await.unwrap();
        bc.finished().await;
    }

    #[tokio::test]
    async fn test_dropping_every_handle_closes_streams() {
        let bc = Broadcaster::<u32>::new(BroadcasterConfig::default()).unwrap();
        let done = CancellationToken::new();
        let mut sub = bc.subscribe(Some(done)).await;
        drop(bc);

        assert_eq!(sub.recv().await, None);
    }
}

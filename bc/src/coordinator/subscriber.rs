//! Subscriber records and bounded-wait delivery attempts
//!
//! A [`Subscriber`] pairs a consumer's sink with an [`Outstanding`] counter.
//! The coordinator bumps the counter before spawning each delivery attempt;
//! the attempt's [`DeliveryGuard`] releases it when the attempt finishes,
//! whichever way it finishes. A sink is only closed once its subscriber has
//! left the registry and the counter is back to zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::messages::SubscriptionId;

/// Count of delivery attempts in flight against one sink
#[derive(Debug, Default)]
pub(crate) struct Outstanding {
    count: AtomicUsize,
    drained: Notify,
}

impl Outstanding {
    /// Reserve a slot for one delivery attempt
    pub(crate) fn acquire(self: &Arc<Self>) -> DeliveryGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        DeliveryGuard {
            outstanding: Arc::clone(self),
        }
    }

    pub(crate) fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until no attempt holds a slot
    pub(crate) async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the await is not missed
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases one outstanding slot on drop
pub(crate) struct DeliveryGuard {
    outstanding: Arc<Outstanding>,
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        if self.outstanding.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.outstanding.drained.notify_waiters();
        }
    }
}

/// How a single delivery attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    /// The sink accepted the message
    Delivered,
    /// The sink did not accept the message within the wait time
    TimedOut,
    /// The consumer dropped its stream
    Disconnected,
}

/// Delivery counters shared by all attempts of one broadcaster
#[derive(Debug, Default)]
pub(crate) struct DeliveryStats {
    completed: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryStats {
    fn record(&self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.completed.fetch_add(1, Ordering::Relaxed),
            DeliveryOutcome::TimedOut | DeliveryOutcome::Disconnected => self.dropped.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Try to push one message into one sink, giving up after `wait`
pub(crate) async fn attempt<T>(sink: mpsc::Sender<T>, msg: T, wait: Duration) -> DeliveryOutcome {
    match tokio::time::timeout(wait, sink.send(msg)).await {
        Ok(Ok(())) => DeliveryOutcome::Delivered,
        Ok(Err(_)) => DeliveryOutcome::Disconnected,
        Err(_) => DeliveryOutcome::TimedOut,
    }
}

/// A registered consumer: its sink plus the attempts in flight against it
pub(crate) struct Subscriber<T> {
    id: SubscriptionId,
    sink: mpsc::Sender<T>,
    outstanding: Arc<Outstanding>,
    /// Cancelled when the subscriber leaves the registry, stops its watcher
    left: CancellationToken,
}

impl<T: Send + 'static> Subscriber<T> {
    pub(crate) fn new(id: SubscriptionId, sink: mpsc::Sender<T>, left: CancellationToken) -> Self {
        Self {
            id,
            sink,
            outstanding: Arc::new(Outstanding::default()),
            left,
        }
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.get()
    }

    /// True once the consumer has dropped its stream
    pub(crate) fn is_disconnected(&self) -> bool {
        self.sink.is_closed()
    }

    /// Mark the subscriber as removed from the registry
    pub(crate) fn detach(&self) {
        self.left.cancel();
    }

    /// Spawn one delivery attempt for `msg`
    ///
    /// The outstanding slot is taken here, before the task is spawned, so a
    /// close that starts right after this call still waits for the attempt.
    pub(crate) fn deliver(&self, msg: T, wait: Duration, stats: &Arc<DeliveryStats>) -> JoinHandle<DeliveryOutcome> {
        let guard = self.outstanding.acquire();
        let sink = self.sink.clone();
        let stats = Arc::clone(stats);
        let id = self.id;

        tokio::spawn(async move {
            let outcome = attempt(sink, msg, wait).await;
            stats.record(outcome);
            match outcome {
                DeliveryOutcome::Delivered => trace!(%id, "Message delivered"),
                DeliveryOutcome::TimedOut => debug!(%id, ?wait, "Delivery timed out, message dropped"),
                DeliveryOutcome::Disconnected => debug!(%id, "Consumer gone, message dropped"),
            }
            drop(guard);
            outcome
        })
    }

    /// Wait for in-flight attempts to finish, then close the sink
    pub(crate) async fn close(self) {
        let Self {
            id,
            sink,
            outstanding,
            left,
        } = self;
        left.cancel();
        debug!(%id, pending = outstanding.get(), "Subscriber::close: waiting for outstanding deliveries");
        outstanding.wait_drained().await;
        drop(sink);
        debug!(%id, "Subscriber::close: sink closed");
    }

    /// Close in the background
    pub(crate) fn spawn_close(self) -> JoinHandle<()> {
        tokio::spawn(self.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outstanding_wait_drained() {
        let outstanding = Arc::new(Outstanding::default());
        let first = outstanding.acquire();
        let second = outstanding.acquire();
        assert_eq!(outstanding.get(), 2);

        let waiter = {
            let outstanding = Arc::clone(&outstanding);
            tokio::spawn(async move { outstanding.wait_drained().await })
        };

        drop(first);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        assert_eq!(outstanding.get(), 1);

        drop(second);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should finish once drained")
            .unwrap();
        assert_eq!(outstanding.get(), 0);
    }

    #[tokio::test]
    async fn test_wait_drained_returns_immediately_when_idle() {
        let outstanding = Outstanding::default();
        tokio::time::timeout(Duration::from_secs(1), outstanding.wait_drained())
            .await
            .expect("idle counter should not block");
    }

    #[tokio::test]
    async fn test_attempt_delivered() {
        let (tx, mut rx) = mpsc::channel(1);

        let outcome = attempt(tx, "hello", Duration::from_secs(5)).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(rx.recv().await, Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_times_out_on_full_sink() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(1).unwrap();

        let outcome = attempt(tx, 2, Duration::from_millis(100)).await;
        assert_eq!(outcome, DeliveryOutcome::TimedOut);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_attempt_disconnected() {
        let (tx, rx) = mpsc::channel::<u32>(1);
        drop(rx);

        let outcome = attempt(tx, 1, Duration::from_secs(5)).await;
        assert_eq!(outcome, DeliveryOutcome::Disconnected);
    }

    #[tokio::test]
    async fn test_close_waits_for_outstanding_deliveries() {
        let (tx, mut rx) = mpsc::channel(1);
        let sub = Subscriber::new(SubscriptionId::new(), tx, CancellationToken::new());
        let stats = Arc::new(DeliveryStats::default());

        let first = sub.deliver("a", Duration::from_secs(60), &stats);
        let second = sub.deliver("b", Duration::from_secs(60), &stats);
        assert_eq!(sub.outstanding(), 2);

        let closing = sub.spawn_close();

        assert_eq!(rx.recv().await, Some("a"));
        assert_eq!(rx.recv().await, Some("b"));
        assert_eq!(rx.recv().await, None);

        assert_eq!(first.await.unwrap(), DeliveryOutcome::Delivered);
        assert_eq!(second.await.unwrap(), DeliveryOutcome::Delivered);
        closing.await.unwrap();
        assert_eq!(stats.completed(), 2);
        assert_eq!(stats.dropped(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_subscriber() {
        let (tx, rx) = mpsc::channel::<&str>(1);
        let sub = Subscriber::new(SubscriptionId::new(), tx, CancellationToken::new());
        assert!(!sub.is_disconnected());

        drop(rx);
        assert!(sub.is_disconnected());

        let stats = Arc::new(DeliveryStats::default());
        let outcome = sub.deliver("lost", Duration::from_secs(60), &stats).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Disconnected);
        assert_eq!(stats.dropped(), 1);
        assert_eq!(sub.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_close_and_detach_cancel_left_token() {
        let (tx, _rx) = mpsc::channel::<u32>(1);
        let left = CancellationToken::new();
        let sub = Subscriber::new(SubscriptionId::new(), tx, left.clone());

        sub.detach();
        assert!(left.is_cancelled());

        let (tx, _rx) = mpsc::channel::<u32>(1);
        let left = CancellationToken::new();
        Subscriber::new(SubscriptionId::new(), tx, left.clone()).close().await;
        assert!(left.is_cancelled());
    }
}

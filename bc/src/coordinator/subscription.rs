//! Subscription - the consumer side of one subscriber's stream

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::messages::SubscriptionId;

/// Stream of broadcast messages for one subscriber
///
/// Ends (`recv` returns `None`) once the subscriber has been removed, by
/// its cancellation token or by the broadcaster closing, and every delivery
/// still in flight for it has finished. Dropping a subscription without
/// cancelling is allowed; the broadcaster prunes it on the next cast.
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(id: SubscriptionId, rx: mpsc::Receiver<T>) -> Self {
        Self { id, rx }
    }

    /// Get this subscription's ID
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next message, or `None` once the stream is closed
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Try to receive a message without waiting
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

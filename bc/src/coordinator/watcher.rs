//! Subscription lifecycle watcher
//!
//! One watcher runs per subscription created with a cancellation token. It
//! turns the token firing into a Leave request, unless the subscriber is
//! already gone: removed, pruned, or closed by the broadcaster finishing.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::messages::{CastRequest, SubscriptionId};

/// Spawn the watcher for one subscription
///
/// `left` fires once the subscriber is no longer registered. Holds only a
/// weak sender so an abandoned broadcaster can still shut down.
pub(crate) fn spawn_watcher<T: Send + 'static>(
    id: SubscriptionId,
    done: CancellationToken,
    left: CancellationToken,
    tx: mpsc::WeakSender<CastRequest<T>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = left.cancelled() => {
                debug!(%id, "Watcher: subscriber gone before unsubscribe");
                return;
            }
            _ = done.cancelled() => {}
        }

        let Some(tx) = tx.upgrade() else {
            debug!(%id, "Watcher: coordinator gone");
            return;
        };

        tokio::select! {
            biased;
            _ = left.cancelled() => debug!(%id, "Watcher: subscriber gone during unsubscribe"),
            res = tx.send(CastRequest::Leave { id }) => match res {
                Ok(()) => debug!(%id, "Watcher: leave requested"),
                Err(_) => debug!(%id, "Watcher: coordinator closed"),
            },
        }
    })
}

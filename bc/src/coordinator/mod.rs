//! Coordinator for subscriber fan-out
//!
//! A single Coordinator task owns the subscriber registry and processes
//! requests one at a time:
//! - **Join:** register a new subscriber sink
//! - **Leave:** remove a subscriber, close its sink once deliveries drain
//! - **Cast:** spawn one bounded-wait delivery attempt per current subscriber
//! - **Shutdown:** refuse further requests, drain and close every sink
//!
//! [`Broadcaster`] is the client handle that turns calls into requests.

mod core;
mod handle;
mod messages;
mod subscriber;
mod subscription;
mod watcher;

pub use handle::Broadcaster;
pub use messages::{BroadcasterMetrics, SubscriptionId};
pub use subscription::Subscription;

//! Broadcaster - fan-out of values to a changing set of subscribers
//!
//! A single producer casts values; every subscriber registered at the time of
//! a cast gets its own copy on a private stream. Subscribers join and leave
//! while casts are in flight. A slow or stalled subscriber never blocks the
//! producer for long: each delivery waits at most the configured wait time and
//! is then dropped for that subscriber only.
//!
//! # Core Concepts
//!
//! - **Single writer**: one coordinator task owns the registry, no locks
//! - **Best effort**: at-most-once delivery, no retries, no replay
//! - **Safe close**: a stream closes only after its in-flight deliveries finish
//! - **Explicit misuse errors**: `cast`/`close` after close return
//!   [`BroadcastError::AlreadyClosed`]
//!
//! Delivery order to one subscriber follows cast order as long as the
//! consumer keeps up. When attempts for consecutive casts overlap (the
//! consumer is slower than the producer) they race and may arrive out of
//! order.
//!
//! # Example
//!
//! ```rust
//! use broadcaster::{Broadcaster, BroadcasterConfig, CancellationToken};
//! use futures::StreamExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), broadcaster::BroadcastError> {
//! let bc = Broadcaster::new(BroadcasterConfig::default())?;
//!
//! let done = CancellationToken::new();
//! let sub = bc.subscribe(Some(done.clone())).await;
//! let reader = tokio::spawn(sub.collect::<Vec<String>>());
//!
//! bc.cast("hello".to_string()).await?;
//! bc.close().await?;
//!
//! assert_eq!(reader.await.unwrap(), vec!["hello".to_string()]);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`coordinator`] - registry owner, delivery attempts, public handle
//! - [`config`] - configuration types and loading
//! - [`error`] - error types
//! - [`cli`] - command-line interface of the `bc` demo binary

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;

pub use config::{BroadcasterConfig, Config};
pub use coordinator::{Broadcaster, BroadcasterMetrics, Subscription, SubscriptionId};
pub use error::{BroadcastError, BroadcastResult};
pub use tokio_util::sync::CancellationToken;

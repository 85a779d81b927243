//! Broadcaster error types

use thiserror::Error;

/// Errors returned by the broadcaster facade
///
/// Dropped deliveries are not errors and never show up here: a message a
/// subscriber does not accept within the wait time is silently skipped for
/// that subscriber only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    /// `cast`, `close` or `metrics` was called after the broadcaster finished.
    #[error("Broadcaster already closed")]
    AlreadyClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result of broadcaster operations
pub type BroadcastResult<T> = Result<T, BroadcastError>;

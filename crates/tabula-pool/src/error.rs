//! Pool error types.

use thiserror::Error;

/// Errors from pool operations.
///
/// `E` is the manager's connection-creation error, passed through unchanged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError<E> {
    /// The manager failed to open a connection.
    #[error("failed to create connection: {0}")]
    Create(E),

    /// The pool stayed full for the whole acquire timeout.
    #[error("timed out waiting for a free connection")]
    Timeout,

    /// The pool has been closed.
    #[error("connection pool is closed")]
    Closed,

    /// The connection was handed out by a different pool.
    #[error("connection belongs to a different pool")]
    ForeignConnection,

    /// The connection's entry no longer exists, e.g. after `clear`.
    #[error("connection is not tracked by this pool")]
    UnknownConnection,

    /// Invalid pool configuration.
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl<E> PoolError<E> {
    /// The manager's error, if creation failed.
    pub fn into_create_error(self) -> Option<E> {
        match self {
            Self::Create(e) => Some(e),
            _ => None,
        }
    }

    /// Whether this is a misuse of the pool rather than a runtime failure.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::ForeignConnection | Self::UnknownConnection)
    }
}

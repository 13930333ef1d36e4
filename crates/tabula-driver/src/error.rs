//! Driver-level error types.

use thiserror::Error;

/// Outcome of applying a single connection option, when it did not succeed.
///
/// Success is represented by `Ok(())` wherever these appear, so there is
/// no "none" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum OptionError {
    /// The option can only be set on a live session; retry after connecting.
    #[error("option cannot be set until the connection is established")]
    Disconnected,

    /// The backend refused the option's value.
    #[error("backend rejected the option value")]
    ApiReject,

    /// The backend does not support this option at all.
    #[error("option is not supported by this backend")]
    ApiLimit,

    /// The option only takes effect before the handshake.
    #[error("option must be set before connecting")]
    Connected,
}

impl OptionError {
    /// Whether setting the same option again later could succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// Error reported by a backend for a connect, query or command failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    /// Human-readable description, usually straight from the DBMS.
    pub message: String,
    /// Backend-specific error number, if the DBMS supplied one.
    pub code: Option<u32>,
}

impl BackendError {
    /// Create an error without a numeric code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Create an error carrying the backend's error number.
    pub fn with_code(code: u32, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }

    /// Error used when an operation needs a session and there is none.
    #[must_use]
    pub fn not_connected() -> Self {
        Self::new("not connected to a database server")
    }
}

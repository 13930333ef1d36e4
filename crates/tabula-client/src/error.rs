//! Client error types.

use tabula_driver::{BackendError, OptionError, OptionKind};
use thiserror::Error;

use crate::address::AddressError;

/// Errors raised by a [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// The handshake failed, or succeeded but a queued option could not be
    /// applied afterwards.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        /// Description from the backend.
        message: String,
        /// Backend error number, 0 if none.
        errnum: u32,
    },

    /// The driver refused an option.
    #[error("cannot set option {kind}: {error}")]
    BadOption {
        /// Which option was refused.
        kind: OptionKind,
        /// Why it was refused.
        error: OptionError,
    },

    /// The server address could not be turned into an IPC method.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// A statement failed.
    #[error("query failed: {message}")]
    Query {
        /// Description from the backend.
        message: String,
        /// Backend error number, 0 if none.
        errnum: u32,
    },

    /// The operation needs a live connection.
    #[error("not connected to a database server")]
    NotConnected,

    /// A database or other identifier failed validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Invalid connection parameters.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Backend error number, or 0 when the error did not come from the backend.
    #[must_use]
    pub fn errnum(&self) -> u32 {
        match self {
            Self::ConnectionFailed { errnum, .. } | Self::Query { errnum, .. } => *errnum,
            _ => 0,
        }
    }

    pub(crate) fn query(error: &BackendError) -> Self {
        Self::Query {
            message: error.message.clone(),
            errnum: error.code.unwrap_or(0),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

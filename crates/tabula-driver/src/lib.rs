//! # tabula-driver
//!
//! Backend-independent driver layer for the tabula database client.
//!
//! This crate decouples the high-level [`Connection`] API from any one
//! DBMS. A concrete backend implements the [`Backend`] trait (connect,
//! execute, option application, ...), and [`DbDriver`] wraps it with the
//! machinery every backend shares: the connected flag, the last error,
//! and the connection-option ledger.
//!
//! ## Deferred options
//!
//! Some options can only be applied once a session is up. Handing such an
//! option to a disconnected driver is not a failure: it is queued, and the
//! queue is replayed in submission order right after the next successful
//! handshake.
//!
//! ```rust,ignore
//! use tabula_driver::{ConnOption, DbDriver, OptionError, OptionOutcome};
//!
//! let mut driver = DbDriver::new(backend);
//! let outcome = driver.set_option(ConnOption::MultiStatements(true))?;
//! if outcome == OptionOutcome::Deferred {
//!     assert_eq!(driver.option_error(), Some(OptionError::Disconnected));
//! }
//! driver.connect(&args); // pending options are applied here
//! ```
//!
//! [`Connection`]: https://docs.rs/tabula-client

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod driver;
pub mod error;
pub mod option;

pub use backend::{Backend, ConnectArgs, ResultSet, escape_sql_string};
pub use driver::{DbDriver, OptionOutcome, RetryPolicy};
pub use error::{BackendError, OptionError};
pub use option::{ConnOption, OptionKind, Protocol, SslSettings};

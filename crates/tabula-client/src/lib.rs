//! # tabula-client
//!
//! Blocking database connections over a pluggable driver.
//!
//! A [`Connection`] owns one [`DbDriver`](tabula_driver::DbDriver) and adds
//! what applications work with directly: server address resolution (TCP,
//! Unix domain socket or named pipe), a choice between error propagation and
//! error recording, and value-style cloning.
//!
//! ## Features
//!
//! - **Address resolution**: `host[:port-or-service]`, bracketed IPv6
//!   literals, socket paths, and named pipes
//! - **Connection strings**: `Server=...;Database=...;Connect Timeout=5`
//! - **Dual error mode**: `Err(..)` or `Ok(false)` plus
//!   [`Connection::error`], fixed per connection
//! - **MySQL backend** (`mysql` feature): built on `mysql_async`
//!
//! ## Example
//!
//! ```rust,ignore
//! use tabula_client::{ConnectParams, Connection, ErrorMode};
//!
//! let params = ConnectParams::from_connection_string(
//!     "Server=localhost:3306;Database=shop;User Id=app;Password=secret;Charset=utf8mb4"
//! )?;
//!
//! let mut conn = Connection::mysql(ErrorMode::Propagate);
//! conn.connect(&params)?;
//! conn.execute("UPDATE stock SET qty = qty - 1 WHERE id = 7")?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod address;
pub mod config;
pub mod connection;
pub mod error;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod services;

// Re-export commonly used types
pub use address::{AddressError, IpcMethod, is_named_pipe, is_socket, parse_address};
pub use config::ConnectParams;
pub use connection::{Connection, ErrorMode};
pub use error::{Error, Result};
#[cfg(feature = "mysql")]
pub use mysql::MysqlBackend;
pub use tabula_driver::{ConnOption, OptionError, OptionKind, Protocol, SslSettings};

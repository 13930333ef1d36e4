//! # tabula-pool
//!
//! Thread-safe connection pool for tabula connections.
//!
//! The pool hands out connections one caller at a time, keeps released
//! ones for reuse, and destroys those that sit idle for too long. It is
//! generic over a [`ConnectionManager`], which opens, checks and closes the
//! underlying connections; [`ClientManager`] does this for
//! [`tabula_client::Connection`].
//!
//! ## Features
//!
//! - **Reuse**: most recently released connection first
//! - **Idle eviction**: swept on every grab and release, or on demand
//! - **Validation**: [`ConnectionPool::safe_grab`] pings reused connections
//! - **Optional bound**: `max_connections` with an acquire timeout
//! - **Scoped release**: [`ScopedConnection`] returns the connection on drop
//!
//! ## Example
//!
//! ```rust,ignore
//! use tabula_client::ConnectParams;
//! use tabula_pool::{ClientManager, ConnectionPool, ScopedConnection};
//!
//! let params = ConnectParams::from_connection_string(
//!     "Server=localhost;Database=shop;User Id=app;Password=secret"
//! )?;
//! let pool = ConnectionPool::builder(ClientManager::mysql(params))
//!     .max_connections(10)
//!     .build()?;
//!
//! let mut conn = ScopedConnection::new(&pool, true)?;
//! let rows = conn.query("SELECT id, name FROM customers")?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
pub mod scoped;

// Re-export commonly used types
pub use config::PoolConfig;
pub use error::PoolError;
pub use manager::{ClientManager, ConnectionManager};
pub use pool::{ConnectionPool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};
pub use scoped::ScopedConnection;

//! Scope-bound pool checkouts.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::error::PoolError;
use crate::manager::ConnectionManager;
use crate::pool::{ConnectionPool, PooledConnection};

/// A pooled connection that goes back to its pool when the scope ends.
///
/// The release also happens while unwinding from a panic. The guard can be
/// neither cloned nor released by hand, so a connection is returned exactly
/// once.
///
/// ```rust,ignore
/// {
///     let mut conn = ScopedConnection::new(&pool, true)?;
///     conn.execute("DELETE FROM sessions WHERE expires < NOW()")?;
/// } // released here
/// ```
pub struct ScopedConnection<'a, M: ConnectionManager> {
    pool: &'a ConnectionPool<M>,
    conn: PooledConnection<M>,
}

impl<'a, M: ConnectionManager> ScopedConnection<'a, M> {
    /// Check a connection out of `pool`, through
    /// [`safe_grab`](ConnectionPool::safe_grab) when `safe` is set.
    pub fn new(pool: &'a ConnectionPool<M>, safe: bool) -> Result<Self, PoolError<M::Error>> {
        let conn = if safe { pool.safe_grab()? } else { pool.grab()? };
        Ok(Self { pool, conn })
    }

    /// The pool this connection returns to.
    #[must_use]
    pub fn pool(&self) -> &'a ConnectionPool<M> {
        self.pool
    }

    /// The pool-assigned connection number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.conn.id()
    }
}

impl<M: ConnectionManager> Deref for ScopedConnection<'_, M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        &self.conn
    }
}

impl<M: ConnectionManager> DerefMut for ScopedConnection<'_, M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        &mut self.conn
    }
}

impl<M: ConnectionManager> fmt::Debug for ScopedConnection<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

impl<M: ConnectionManager> Drop for ScopedConnection<'_, M> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.check_in() {
            tracing::error!(connection_id = self.conn.id(), error = %e, "scoped release failed");
        }
    }
}

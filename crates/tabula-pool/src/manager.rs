//! Connection factories.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tabula_client::{ConnectParams, Connection};
use tabula_driver::Backend;

/// Opens, checks and closes the connections a pool hands out.
///
/// `create` and `destroy` are called without the pool's lock held, so they
/// may block on the network.
pub trait ConnectionManager: Send + Sync + 'static {
    /// The pooled connection type.
    type Connection: Send + 'static;

    /// Error returned by [`create`](Self::create).
    type Error: fmt::Debug + fmt::Display + Send + 'static;

    /// Open a new connection.
    fn create(&self) -> Result<Self::Connection, Self::Error>;

    /// Close a connection the pool is done with. Must not fail.
    fn destroy(&self, conn: Self::Connection) {
        drop(conn);
    }

    /// Check that an idle connection still works before reusing it.
    fn is_valid(&self, conn: &mut Self::Connection) -> bool;

    /// Idle time after which released connections are destroyed.
    ///
    /// `None` defers to the pool configuration.
    fn max_idle_time(&self) -> Option<Duration> {
        None
    }
}

type BackendFactory = Arc<dyn Fn() -> Box<dyn Backend> + Send + Sync>;

/// Manager producing [`Connection`]s from fixed parameters.
#[derive(Clone)]
pub struct ClientManager {
    params: ConnectParams,
    backend: BackendFactory,
    max_idle_time: Option<Duration>,
}

impl ClientManager {
    /// Connect with `params`, building each connection's backend with
    /// `backend`.
    pub fn new(
        params: ConnectParams,
        backend: impl Fn() -> Box<dyn Backend> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            backend: Arc::new(backend),
            max_idle_time: None,
        }
    }

    /// Connect with `params` through the MySQL backend.
    #[cfg(feature = "mysql")]
    pub fn mysql(params: ConnectParams) -> Self {
        Self::new(params, || Box::new(tabula_client::MysqlBackend::new()))
    }

    /// Override the pool's idle eviction threshold.
    #[must_use]
    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = Some(idle);
        self
    }

    /// The parameters every connection is opened with.
    #[must_use]
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }
}

impl fmt::Debug for ClientManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientManager")
            .field("params", &self.params)
            .field("max_idle_time", &self.max_idle_time)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager for ClientManager {
    type Connection = Connection;
    type Error = tabula_client::Error;

    fn create(&self) -> Result<Connection, Self::Error> {
        let mut conn = Connection::new((self.backend)());
        conn.connect(&self.params)?;
        Ok(conn)
    }

    fn destroy(&self, mut conn: Connection) {
        conn.disconnect();
    }

    fn is_valid(&self, conn: &mut Connection) -> bool {
        conn.ping()
    }

    fn max_idle_time(&self) -> Option<Duration> {
        self.max_idle_time
    }
}

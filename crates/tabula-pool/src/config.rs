//! Pool configuration.

use std::time::Duration;

/// Sizing and timing policy for a [`ConnectionPool`](crate::ConnectionPool).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PoolConfig {
    /// Upper bound on connections, in use and idle together.
    ///
    /// `None` lets the pool grow without limit.
    pub max_connections: Option<usize>,

    /// How long `grab` waits for a connection when the pool is full.
    ///
    /// `None` waits indefinitely. Ignored for unbounded pools.
    pub acquire_timeout: Option<Duration>,

    /// How long a released connection may sit idle before it is destroyed.
    ///
    /// `None` disables idle eviction. A manager's own
    /// [`max_idle_time`](crate::ConnectionManager::max_idle_time) takes
    /// precedence.
    pub max_idle_time: Option<Duration>,
}

impl PoolConfig {
    /// Create a configuration with default values (unbounded, no eviction).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.max_connections = Some(count);
        self
    }

    /// Set how long `grab` may wait when the pool is full.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Set the idle time after which released connections are destroyed.
    #[must_use]
    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = Some(idle);
        self
    }

    /// Check the configuration for values the pool cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == Some(0) {
            return Err("max_connections must be greater than 0".into());
        }
        if self.acquire_timeout == Some(Duration::ZERO) && self.max_connections.is_some() {
            return Err("acquire_timeout must be greater than 0 for a bounded pool".into());
        }
        Ok(())
    }
}

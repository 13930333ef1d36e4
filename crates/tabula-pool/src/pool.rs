//! Connection pool implementation.
//!
//! Each pool entry is either free (with the time it was released), in use,
//! or being opened. All bookkeeping sits behind one mutex per pool; the
//! manager's `create` and `destroy` hooks always run with that mutex
//! released, so a slow network dial never holds up other callers.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::manager::ConnectionManager;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A pool of reusable connections.
///
/// The pool grows on demand: [`grab`](Self::grab) hands out the most
/// recently released idle connection, or asks the manager for a new one.
/// Released connections that stay idle longer than
/// [`max_idle_time`](Self::max_idle_time) are destroyed by the sweep that
/// runs on every grab and release.
///
/// A connection is never handed to two callers at once. Because
/// [`release`](Self::release) consumes the handle, double releases cannot
/// happen; a handle dropped without being released is treated as broken and
/// its connection is destroyed.
///
/// # Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use tabula_pool::{ClientManager, ConnectionPool};
///
/// let pool = ConnectionPool::builder(ClientManager::mysql(params))
///     .max_connections(16)
///     .max_idle_time(Duration::from_secs(300))
///     .build()?;
///
/// let mut conn = pool.grab()?;
/// conn.execute("UPDATE stock SET qty = qty - 1 WHERE id = 7")?;
/// pool.release(conn)?;
/// ```
pub struct ConnectionPool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

struct PoolInner<M: ConnectionManager> {
    /// Identifies handles issued by this pool.
    id: u64,

    manager: M,

    config: PoolConfig,

    state: Mutex<PoolState<M::Connection>>,

    /// Signalled whenever capacity frees up.
    available: Condvar,

    /// When the pool was created.
    created_at: Instant,

    metrics: Mutex<PoolMetricsInner>,
}

struct PoolState<C> {
    entries: Vec<Entry<C>>,
    next_entry_id: u64,
    closed: bool,
}

struct Entry<C> {
    id: u64,
    slot: Slot<C>,
}

enum Slot<C> {
    Free { conn: C, released_at: Instant },
    InUse,
    Opening,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    /// Total connections created.
    connections_created: u64,
    /// Total connections destroyed.
    connections_closed: u64,
    /// Total successful checkouts.
    checkouts_successful: u64,
    /// Total failed checkouts (creation errors, timeouts).
    checkouts_failed: u64,
    /// Checkouts served by an idle connection.
    reuses: u64,
    /// Liveness checks performed by `safe_grab`.
    validations_performed: u64,
    /// Liveness checks that failed.
    validations_failed: u64,
    /// Connections destroyed for sitting idle too long.
    idle_evictions: u64,
    /// Handles dropped without being released.
    abandoned: u64,
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Create a pool builder around a manager.
    #[must_use]
    pub fn builder(manager: M) -> PoolBuilder<M> {
        PoolBuilder::new(manager)
    }

    /// Create a pool with the given configuration.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError<M::Error>> {
        config.validate().map_err(PoolError::Config)?;

        let inner = Arc::new(PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            manager,
            config: config.clone(),
            state: Mutex::new(PoolState {
                entries: Vec::new(),
                next_entry_id: 1,
                closed: false,
            }),
            available: Condvar::new(),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });

        tracing::info!(
            pool_id = inner.id,
            max = ?config.max_connections,
            max_idle_time = ?inner.max_idle_time(),
            "connection pool created"
        );

        Ok(Self { inner })
    }

    /// Get a connection, reusing an idle one when possible.
    ///
    /// A failure to create a new connection is returned as
    /// [`PoolError::Create`]; the pool does not retry.
    pub fn grab(&self) -> Result<PooledConnection<M>, PoolError<M::Error>> {
        self.acquire(false)
    }

    /// Like [`grab`](Self::grab), but check a reused connection with the
    /// manager's [`is_valid`](ConnectionManager::is_valid) first.
    ///
    /// Dead connections are destroyed and the next candidate is tried.
    /// Newly created connections are not checked again.
    pub fn safe_grab(&self) -> Result<PooledConnection<M>, PoolError<M::Error>> {
        self.acquire(true)
    }

    /// Return a connection to the pool.
    pub fn release(&self, mut conn: PooledConnection<M>) -> Result<(), PoolError<M::Error>> {
        if conn.pool_id != self.inner.id {
            tracing::error!(
                pool_id = self.inner.id,
                owner_pool_id = conn.pool_id,
                connection_id = conn.id,
                "connection released to the wrong pool"
            );
            return Err(PoolError::ForeignConnection);
        }
        self.inner.check_in(&mut conn)
    }

    /// Destroy a connection the caller knows is broken.
    ///
    /// A handle from another pool is refused with
    /// [`PoolError::ForeignConnection`]; it is then dropped, which removes
    /// it from the pool that issued it.
    pub fn remove(&self, mut conn: PooledConnection<M>) -> Result<(), PoolError<M::Error>> {
        if conn.pool_id != self.inner.id {
            tracing::error!(
                pool_id = self.inner.id,
                owner_pool_id = conn.pool_id,
                connection_id = conn.id,
                "connection removed from the wrong pool"
            );
            return Err(PoolError::ForeignConnection);
        }
        let Some(raw) = conn.conn.take() else {
            return Ok(());
        };
        self.inner.forget(conn.id);
        tracing::debug!(connection_id = conn.id, "removing connection from pool");
        self.inner.destroy(raw);
        Ok(())
    }

    /// Destroy a broken connection and grab a replacement.
    pub fn exchange(
        &self,
        conn: PooledConnection<M>,
    ) -> Result<PooledConnection<M>, PoolError<M::Error>> {
        self.remove(conn)?;
        self.grab()
    }

    /// Destroy idle connections older than the idle limit.
    ///
    /// Returns how many were destroyed.
    pub fn sweep(&self) -> usize {
        let expired = {
            let mut state = self.inner.state.lock();
            self.inner.take_expired(&mut state)
        };
        let count = expired.len();
        self.inner.destroy_expired(expired);
        count
    }

    /// Destroy every idle connection, regardless of idle time.
    ///
    /// Connections in use are not affected.
    pub fn shrink(&self) {
        let free = {
            let mut state = self.inner.state.lock();
            take_free(&mut state.entries, |_| true)
        };
        if !free.is_empty() {
            tracing::debug!(count = free.len(), "shrinking connection pool");
        }
        for conn in free {
            self.inner.destroy(conn);
        }
    }

    /// Forget every entry and destroy the idle connections.
    ///
    /// Callers must not hold connections from the pool; any that are still
    /// out are destroyed when they come back.
    pub fn clear(&self) {
        let free = {
            let mut state = self.inner.state.lock();
            let in_use = state
                .entries
                .iter()
                .filter(|e| !matches!(e.slot, Slot::Free { .. }))
                .count();
            if in_use > 0 {
                tracing::warn!(
                    pool_id = self.inner.id,
                    in_use,
                    "clearing pool while connections are in use"
                );
            }
            let free = take_free(&mut state.entries, |_| true);
            state.entries.clear();
            free
        };
        self.inner.available.notify_all();
        for conn in free {
            self.inner.destroy(conn);
        }
    }

    /// Clear the pool and refuse further grabs.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.clear();
        tracing::info!(pool_id = self.inner.id, "connection pool closed");
    }

    /// Whether the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Whether the pool tracks no connections at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    /// Idle time after which released connections are destroyed.
    #[must_use]
    pub fn max_idle_time(&self) -> Option<Duration> {
        self.inner.max_idle_time()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let mut status = PoolStatus {
            available: 0,
            in_use: 0,
            opening: 0,
            total: state.entries.len(),
            max: self.inner.config.max_connections,
        };
        for entry in &state.entries {
            match entry.slot {
                Slot::Free { .. } => status.available += 1,
                Slot::InUse => status.in_use += 1,
                Slot::Opening => status.opening += 1,
            }
        }
        status
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            reuses: inner.reuses,
            validations_performed: inner.validations_performed,
            validations_failed: inner.validations_failed,
            idle_evictions: inner.idle_evictions,
            abandoned: inner.abandoned,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the connection manager.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    fn acquire(&self, validate: bool) -> Result<PooledConnection<M>, PoolError<M::Error>> {
        let inner = &self.inner;
        let deadline = inner.config.acquire_timeout.map(|t| Instant::now() + t);

        loop {
            let mut state = inner.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }

            let expired = inner.take_expired(&mut state);
            if !expired.is_empty() {
                drop(state);
                inner.destroy_expired(expired);
                continue;
            }

            // Most recently released first: it is the least likely to have
            // timed out on the server side.
            let newest = state
                .entries
                .iter()
                .enumerate()
                .filter_map(|(i, e)| match e.slot {
                    Slot::Free { released_at, .. } => Some((i, released_at)),
                    _ => None,
                })
                .max_by_key(|&(_, released_at)| released_at)
                .map(|(i, _)| i);

            if let Some(index) = newest {
                let entry = &mut state.entries[index];
                let id = entry.id;
                let Slot::Free { conn: mut raw, .. } =
                    std::mem::replace(&mut entry.slot, Slot::InUse)
                else {
                    continue;
                };
                drop(state);

                if validate {
                    let valid = inner.manager.is_valid(&mut raw);
                    {
                        let mut metrics = inner.metrics.lock();
                        metrics.validations_performed += 1;
                        if !valid {
                            metrics.validations_failed += 1;
                        }
                    }
                    if !valid {
                        tracing::warn!(
                            pool_id = inner.id,
                            connection_id = id,
                            "idle connection failed validation, replacing it"
                        );
                        inner.forget(id);
                        inner.destroy(raw);
                        continue;
                    }
                }

                {
                    let mut metrics = inner.metrics.lock();
                    metrics.checkouts_successful += 1;
                    metrics.reuses += 1;
                }
                tracing::debug!(pool_id = inner.id, connection_id = id, "reusing idle connection");
                return Ok(self.handle(id, raw));
            }

            if let Some(max) = inner.config.max_connections {
                if state.entries.len() >= max {
                    tracing::trace!(pool_id = inner.id, max, "pool full, waiting");
                    let timed_out = match deadline {
                        Some(deadline) => inner
                            .available
                            .wait_until(&mut state, deadline)
                            .timed_out(),
                        None => {
                            inner.available.wait(&mut state);
                            false
                        }
                    };
                    if timed_out {
                        drop(state);
                        inner.metrics.lock().checkouts_failed += 1;
                        tracing::debug!(pool_id = inner.id, "timed out waiting for a connection");
                        return Err(PoolError::Timeout);
                    }
                    continue;
                }
            }

            let id = state.next_entry_id;
            state.next_entry_id += 1;
            state.entries.push(Entry {
                id,
                slot: Slot::Opening,
            });
            drop(state);

            tracing::debug!(pool_id = inner.id, connection_id = id, "opening new connection");
            return match inner.manager.create() {
                Ok(raw) => {
                    if !inner.mark_in_use(id) {
                        tracing::debug!(
                            pool_id = inner.id,
                            connection_id = id,
                            "pool closed while opening connection"
                        );
                        {
                            let mut metrics = inner.metrics.lock();
                            metrics.connections_created += 1;
                            metrics.checkouts_failed += 1;
                        }
                        inner.destroy(raw);
                        return Err(PoolError::Closed);
                    }
                    {
                        let mut metrics = inner.metrics.lock();
                        metrics.connections_created += 1;
                        metrics.checkouts_successful += 1;
                    }
                    Ok(self.handle(id, raw))
                }
                Err(e) => {
                    inner.forget(id);
                    inner.metrics.lock().checkouts_failed += 1;
                    tracing::debug!(pool_id = inner.id, error = %e, "connection creation failed");
                    Err(PoolError::Create(e))
                }
            };
        }
    }

    fn handle(&self, id: u64, conn: M::Connection) -> PooledConnection<M> {
        PooledConnection {
            conn: Some(conn),
            id,
            pool_id: self.inner.id,
            pool: Arc::downgrade(&self.inner),
        }
    }
}

impl<M: ConnectionManager> PoolInner<M> {
    fn max_idle_time(&self) -> Option<Duration> {
        self.manager.max_idle_time().or(self.config.max_idle_time)
    }

    /// Put a handle's connection back as free.
    fn check_in(&self, handle: &mut PooledConnection<M>) -> Result<(), PoolError<M::Error>> {
        let Some(raw) = handle.conn.take() else {
            return Ok(());
        };

        let mut state = self.state.lock();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == handle.id && matches!(e.slot, Slot::InUse));
        let Some(entry) = entry else {
            drop(state);
            tracing::error!(
                pool_id = self.id,
                connection_id = handle.id,
                "released connection is not tracked by this pool, destroying it"
            );
            self.destroy(raw);
            return Err(PoolError::UnknownConnection);
        };

        entry.slot = Slot::Free {
            conn: raw,
            released_at: Instant::now(),
        };
        let expired = self.take_expired(&mut state);
        drop(state);
        self.available.notify_one();

        tracing::debug!(pool_id = self.id, connection_id = handle.id, "connection released");
        self.destroy_expired(expired);
        Ok(())
    }

    /// Turn an opening slot into an in-use one. Returns `false` if the pool
    /// was closed in the meantime.
    fn mark_in_use(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            state.entries.retain(|e| e.id != id);
            return false;
        }
        match state.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => entry.slot = Slot::InUse,
            // cleared while the connection was being opened
            None => state.entries.push(Entry {
                id,
                slot: Slot::InUse,
            }),
        }
        true
    }

    /// Drop an entry, whatever its state, and wake a waiter.
    fn forget(&self, id: u64) {
        let removed = {
            let mut state = self.state.lock();
            let before = state.entries.len();
            state.entries.retain(|e| e.id != id);
            before != state.entries.len()
        };
        if removed {
            self.available.notify_one();
        }
    }

    fn take_expired(&self, state: &mut MutexGuard<'_, PoolState<M::Connection>>) -> Vec<M::Connection> {
        let Some(limit) = self.max_idle_time() else {
            return Vec::new();
        };
        let now = Instant::now();
        let expired = take_free(&mut state.entries, |released_at| {
            now.saturating_duration_since(released_at) > limit
        });
        if !expired.is_empty() {
            self.available.notify_all();
        }
        expired
    }

    fn destroy_expired(&self, expired: Vec<M::Connection>) {
        if expired.is_empty() {
            return;
        }
        tracing::debug!(pool_id = self.id, count = expired.len(), "evicting idle connections");
        self.metrics.lock().idle_evictions += expired.len() as u64;
        for conn in expired {
            self.destroy(conn);
        }
    }

    fn destroy(&self, conn: M::Connection) {
        self.manager.destroy(conn);
        self.metrics.lock().connections_closed += 1;
    }
}

/// Remove free entries whose release time matches `pred`, returning their
/// connections.
fn take_free<C>(entries: &mut Vec<Entry<C>>, pred: impl Fn(Instant) -> bool) -> Vec<C> {
    let mut taken = Vec::new();
    let mut kept = Vec::with_capacity(entries.len());
    for entry in entries.drain(..) {
        match entry.slot {
            Slot::Free { conn, released_at } if pred(released_at) => {
                tracing::trace!(connection_id = entry.id, "dropping free entry");
                taken.push(conn);
            }
            slot => kept.push(Entry { id: entry.id, slot }),
        }
    }
    *entries = kept;
    taken
}

impl<M: ConnectionManager> Drop for ConnectionPool<M> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<M: ConnectionManager + fmt::Debug> fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.inner.id)
            .field("manager", &self.inner.manager)
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = ConnectionPool::builder(manager)
///     .max_connections(8)
///     .acquire_timeout(Duration::from_secs(2))
///     .build()?;
/// ```
pub struct PoolBuilder<M: ConnectionManager> {
    manager: M,
    pool_config: PoolConfig,
}

impl<M: ConnectionManager> PoolBuilder<M> {
    /// Create a new pool builder with default settings.
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            pool_config: PoolConfig::default(),
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.pool_config.max_connections = Some(count);
        self
    }

    /// Set how long `grab` waits when the pool is full.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.acquire_timeout = Some(timeout);
        self
    }

    /// Set the idle time after which released connections are destroyed.
    #[must_use]
    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.pool_config.max_idle_time = Some(idle);
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<ConnectionPool<M>, PoolError<M::Error>> {
        ConnectionPool::new(self.manager, self.pool_config)
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently handed out.
    pub in_use: usize,
    /// Number of connections being opened.
    pub opening: usize,
    /// Total number of entries.
    pub total: usize,
    /// Maximum allowed connections, if bounded.
    pub max: Option<usize>,
}

impl PoolStatus {
    /// Calculate the utilization percentage of a bounded pool.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        match self.max {
            Some(max) if max > 0 => (self.in_use as f64 / max as f64) * 100.0,
            _ => 0.0,
        }
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.max.is_some_and(|max| self.total >= max)
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections destroyed since pool start.
    pub connections_closed: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (creation errors, timeouts).
    pub checkouts_failed: u64,
    /// Checkouts served by an idle connection.
    pub reuses: u64,
    /// Liveness checks performed by `safe_grab`.
    pub validations_performed: u64,
    /// Liveness checks that failed.
    pub validations_failed: u64,
    /// Connections destroyed for sitting idle too long.
    pub idle_evictions: u64,
    /// Handles dropped without being released.
    pub abandoned: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate the share of checkouts served from idle connections.
    #[must_use]
    pub fn reuse_rate(&self) -> f64 {
        if self.checkouts_successful == 0 {
            return 0.0;
        }
        self.reuses as f64 / self.checkouts_successful as f64
    }
}

/// A connection checked out of a pool.
///
/// Give it back with [`ConnectionPool::release`]. Dropping it instead
/// destroys the connection.
pub struct PooledConnection<M: ConnectionManager> {
    /// Present until released or dropped.
    conn: Option<M::Connection>,
    id: u64,
    pool_id: u64,
    pool: Weak<PoolInner<M>>,
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// The pool-assigned connection number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn check_in(&mut self) -> Result<(), PoolError<M::Error>> {
        match self.pool.upgrade() {
            Some(pool) => pool.check_in(self),
            None => Err(PoolError::Closed),
        }
    }
}

#[allow(clippy::expect_used)]
impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        self.conn.as_ref().expect("pooled connection used after release")
    }
}

#[allow(clippy::expect_used)]
impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        self.conn.as_mut().expect("pooled connection used after release")
    }
}

impl<M: ConnectionManager> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("pool_id", &self.pool_id)
            .finish_non_exhaustive()
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => {
                tracing::warn!(
                    pool_id = self.pool_id,
                    connection_id = self.id,
                    "pooled connection dropped without release, destroying it"
                );
                pool.metrics.lock().abandoned += 1;
                pool.forget(self.id);
                pool.destroy(conn);
            }
            None => drop(conn),
        }
    }
}

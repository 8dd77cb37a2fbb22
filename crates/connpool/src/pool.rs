//! Connection pool implementation.
//!
//! Admission is a counting semaphore of `max_connections` tickets: every
//! borrowed connection holds one ticket until it is returned. Idle
//! connections hold no ticket, so the pool may keep more connections open
//! than it lends out at any moment, but never lends more than its capacity.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, OnceCell, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionOptions};
use crate::error::PoolError;
use crate::metrics::{MetricsCollector, PoolMetrics};

/// A bounded pool of reusable connections.
///
/// The pool hands out at most `max_connections` connections at a time,
/// recycles healthy ones in LIFO order, evicts decayed idle connections in
/// a background sweep and shuts down gracefully through [`Pool::drain`].
///
/// `Pool` is a cheap handle; clones share the same underlying pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    capacity: usize,
    connection_options: ConnectionOptions,
    tickets: Arc<Semaphore>,
    idle: Mutex<Vec<Connection>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    outstanding: AtomicUsize,
    returned: Notify,
    drained: OnceCell<()>,
    metrics: MetricsCollector,
}

impl Pool {
    /// Create a pool with the given capacity and default settings.
    ///
    /// A capacity of zero selects the default capacity. The background
    /// sweeper starts immediately, so this must be called from within a
    /// Tokio runtime.
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        Self::with_config(PoolConfig::new().max_connections(capacity))
    }

    /// Create a pool from an explicit configuration.
    pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PoolError::Configuration("pool must be created inside a Tokio runtime".into())
        })?;

        let capacity = config.capacity();
        let interval = config.health_check_interval;
        let inner = Arc::new(PoolInner {
            capacity,
            connection_options: ConnectionOptions::from(&config),
            tickets: Arc::new(Semaphore::new(capacity)),
            idle: Mutex::new(Vec::with_capacity(capacity)),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            outstanding: AtomicUsize::new(0),
            returned: Notify::new(),
            drained: OnceCell::new(),
            metrics: MetricsCollector::default(),
            config,
        });

        runtime.spawn(run_sweeper(
            Arc::downgrade(&inner),
            inner.shutdown.clone(),
            interval,
        ));

        tracing::debug!(
            max_connections = capacity,
            health_check_interval = ?interval,
            "connection pool created"
        );

        Ok(Self { inner })
    }

    /// Borrow a connection from the pool.
    ///
    /// Returns the most recently released idle connection, or creates a new
    /// one when none is idle. If every ticket is taken, this waits until a
    /// connection is released, the configured `connection_timeout` elapses,
    /// or the pool starts draining.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        match self.inner.config.connection_timeout {
            Some(timeout) => self.acquire_timeout(timeout).await,
            None => self.acquire_inner().await,
        }
    }

    /// Borrow a connection, waiting at most `timeout` for a free ticket.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection, PoolError> {
        match tokio::time::timeout(timeout, self.acquire_inner()).await {
            Ok(result) => result,
            Err(_) => {
                self.inner.metrics.acquire_timed_out();
                tracing::warn!(
                    ?timeout,
                    max_connections = self.inner.capacity,
                    "timed out waiting for a connection"
                );
                Err(PoolError::AcquisitionTimeout(timeout))
            }
        }
    }

    /// Borrow a connection only if a ticket is free right now.
    ///
    /// Returns `Ok(None)` when the pool is at capacity.
    pub fn try_acquire(&self) -> Result<Option<PooledConnection>, PoolError> {
        if self.inner.is_closed() {
            self.inner.metrics.checkout_failed();
            return Err(PoolError::PoolClosed);
        }
        match Arc::clone(&self.inner.tickets).try_acquire_owned() {
            Ok(permit) => self.admit(permit).map(Some),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(PoolError::PoolClosed),
        }
    }

    async fn acquire_inner(&self) -> Result<PooledConnection, PoolError> {
        let inner = &self.inner;
        if inner.is_closed() {
            inner.metrics.checkout_failed();
            return Err(PoolError::PoolClosed);
        }

        tracing::trace!("acquiring connection from pool");

        let permit = tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => None,
            permit = Arc::clone(&inner.tickets).acquire_owned() => permit.ok(),
        };
        match permit {
            Some(permit) => self.admit(permit),
            None => {
                inner.metrics.checkout_failed();
                Err(PoolError::PoolClosed)
            }
        }
    }

    /// Turn an admission ticket into a borrowed connection.
    fn admit(&self, permit: OwnedSemaphorePermit) -> Result<PooledConnection, PoolError> {
        let inner = &self.inner;

        // Register the borrow before re-reading the latch; drain sets the
        // latch before reading the count, so one of the two sees the other.
        inner.outstanding.fetch_add(1, Ordering::SeqCst);
        if inner.is_closed() {
            inner.finish_borrow();
            inner.metrics.checkout_failed();
            return Err(PoolError::PoolClosed);
        }

        let reused = inner.idle.lock().pop();
        let reused_connection = reused.is_some();
        let mut conn = match reused {
            Some(conn) => conn,
            None => {
                let conn = Connection::new(inner.connection_options.clone());
                inner.metrics.connection_created();
                tracing::debug!(connection_id = conn.id(), "created new connection");
                conn
            }
        };
        conn.metadata_mut().mark_checkout();
        inner.metrics.checkout_succeeded();

        tracing::trace!(
            connection_id = conn.id(),
            reused = reused_connection,
            "connection checked out"
        );

        Ok(PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            pool: Arc::clone(inner),
        })
    }

    /// Return a borrowed connection to the pool.
    ///
    /// Healthy connections go back on the idle stack. Unhealthy ones, and
    /// every connection returned while the pool is draining, are closed.
    /// The admission ticket is freed in all cases. Dropping a
    /// [`PooledConnection`] has the same effect.
    pub fn release(&self, conn: PooledConnection) {
        if !Arc::ptr_eq(&self.inner, &conn.pool) {
            tracing::debug!(
                connection_id = conn.id(),
                "connection released through a different pool; returning to its owner"
            );
        }
        conn.release();
    }

    /// Gracefully shut the pool down.
    ///
    /// Stops admitting borrows, wakes every blocked `acquire` with
    /// [`PoolError::PoolClosed`], stops the sweeper, closes idle
    /// connections and waits until every borrowed connection is returned.
    /// Only the first call performs the shutdown; concurrent callers wait
    /// for it to finish and later callers return immediately.
    pub async fn drain(&self) {
        self.inner
            .drained
            .get_or_init(|| self.inner.run_drain())
            .await;
    }

    /// Number of idle connections.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Check if the pool has started draining.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let available = self.idle_count();
        let in_use = self.inner.outstanding.load(Ordering::SeqCst);
        PoolStatus {
            available,
            in_use,
            total: available + in_use,
            max: self.inner.capacity,
            tickets_available: self.inner.tickets.available_permits(),
        }
    }

    /// Get a snapshot of the pool counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.snapshot()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    #[cfg(test)]
    pub(crate) fn sweep_now(&self) -> usize {
        self.inner.sweep()
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PoolInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn finish_borrow(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.returned.notify_waiters();
        }
    }

    /// Decide whether a connection may stay in (or go back to) the idle set.
    fn is_reusable(&self, conn: &Connection) -> bool {
        if conn.state().should_remove() {
            return false;
        }
        let metadata = conn.metadata();
        if self
            .config
            .max_lifetime
            .is_some_and(|lifetime| metadata.is_expired(lifetime))
        {
            return false;
        }
        if self
            .config
            .idle_timeout
            .is_some_and(|timeout| metadata.is_idle_expired(timeout))
        {
            return false;
        }
        let healthy = conn.is_healthy();
        self.metrics.health_check(healthy);
        healthy
    }

    fn discard(&self, conn: &mut Connection, reason: &'static str) {
        if conn.discard() {
            self.metrics.connection_closed();
            tracing::debug!(connection_id = conn.id(), reason, "connection closed");
        }
    }

    fn checkin(&self, mut conn: Connection) {
        if conn.is_closed() {
            conn.metadata_mut().mark_closed();
            tracing::trace!(
                connection_id = conn.id(),
                "released connection was already closed"
            );
            return;
        }
        if !self.is_reusable(&conn) {
            self.discard(&mut conn, "unhealthy");
            return;
        }
        if self.is_closed() {
            self.discard(&mut conn, "pool draining");
            return;
        }

        conn.metadata_mut().mark_checkin();
        let connection_id = conn.id();
        let rejected = {
            let mut idle = self.idle.lock();
            if self.is_closed() {
                Some(conn)
            } else {
                idle.push(conn);
                None
            }
        };
        match rejected {
            Some(mut conn) => self.discard(&mut conn, "pool draining"),
            None => tracing::trace!(connection_id, "connection returned to idle"),
        }
    }

    /// Evict decayed idle connections. Returns the number evicted.
    ///
    /// Runs entirely under the idle lock: drain and acquire never observe a
    /// partially swept idle set, and a drain that starts mid-sweep closes
    /// whatever the sweep keeps.
    fn sweep(&self) -> usize {
        let mut idle = self.idle.lock();
        let checked = idle.len();
        let closed = self.is_closed();
        idle.retain_mut(|conn| {
            if !closed && self.is_reusable(conn) {
                true
            } else {
                self.discard(conn, "failed idle health check");
                false
            }
        });
        let evicted = checked - idle.len();
        drop(idle);

        self.metrics.sweep_completed();
        if evicted > 0 {
            tracing::debug!(checked, evicted, "idle sweep evicted connections");
        } else {
            tracing::trace!(checked, "idle sweep completed");
        }
        evicted
    }

    fn close_idle(&self) -> usize {
        let idle = std::mem::take(&mut *self.idle.lock());
        let count = idle.len();
        for mut conn in idle {
            self.discard(&mut conn, "pool draining");
        }
        count
    }

    async fn wait_for_outstanding(&self) {
        loop {
            let mut notified = pin!(self.returned.notified());
            notified.as_mut().enable();
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn run_drain(&self) {
        let started = Instant::now();
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();

        let closed_idle = self.close_idle();
        tracing::info!(
            outstanding = self.outstanding.load(Ordering::SeqCst),
            closed_idle,
            "draining connection pool"
        );

        self.wait_for_outstanding().await;
        let closed_late = self.close_idle();

        tracing::info!(
            closed_late,
            elapsed = ?started.elapsed(),
            "connection pool drained"
        );
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let idle = std::mem::take(self.idle.get_mut());
        for mut conn in idle {
            self.discard(&mut conn, "pool dropped");
        }
    }
}

async fn run_sweeper(pool: Weak<PoolInner>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = pool.upgrade() else {
            break;
        };
        inner.sweep();
    }

    tracing::debug!("idle sweeper stopped");
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently borrowed.
    pub in_use: usize,
    /// Idle plus borrowed connections.
    pub total: usize,
    /// Maximum number of concurrently borrowed connections.
    pub max: usize,
    /// Admission tickets not currently held by a borrow.
    pub tickets_available: usize,
}

impl PoolStatus {
    /// Percentage of capacity currently borrowed.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.in_use as f64 / self.max as f64 * 100.0
        }
    }
}

/// A connection borrowed from the pool.
///
/// Dereferences to [`Connection`]. When dropped, the connection is returned
/// to the pool exactly as if it had been passed to [`Pool::release`].
pub struct PooledConnection {
    conn: Option<Connection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    /// Return the connection to its pool.
    pub fn release(self) {
        drop(self);
    }

    /// Detach the connection from the pool.
    ///
    /// The admission ticket is returned immediately and the pool forgets
    /// the connection; the caller becomes responsible for closing it.
    pub fn detach(mut self) -> Connection {
        let mut conn = self.take_connection();
        conn.metadata_mut().mark_checkin();
        tracing::debug!(connection_id = conn.id(), "connection detached from pool");
        conn
    }

    #[allow(clippy::expect_used)]
    fn take_connection(&mut self) -> Connection {
        let conn = self
            .conn
            .take()
            .expect("connection is present until the guard is consumed");
        self.pool.finish_borrow();
        self.permit.take();
        conn
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("connection is present until the guard is consumed")
    }
}

impl DerefMut for PooledConnection {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("connection is present until the guard is consumed")
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.conn)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::trace!(connection_id = conn.id(), "returning connection to pool");
            self.pool.checkin(conn);
            self.pool.finish_borrow();
        }
        self.permit.take();
    }
}

//! The pooled connection entity.
//!
//! A [`Connection`] stands in for a real network session: it has a stable
//! identity, a one-way closed flag and a health probe that fails at a
//! configurable rate, the way a ping against a flaky peer would.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;

use crate::config::{DEFAULT_UNHEALTHY_RATE, PoolConfig};
use crate::error::ConnectionError;
use crate::lifecycle::{ConnectionMetadata, ConnectionState};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Behavior knobs for a simulated connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    /// Probability in `[0, 1]` that a health check fails.
    pub unhealthy_rate: f64,
    /// Lower bound of the simulated work latency.
    pub min_work_latency: Duration,
    /// Upper bound of the simulated work latency.
    pub max_work_latency: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            unhealthy_rate: DEFAULT_UNHEALTHY_RATE,
            min_work_latency: Duration::from_millis(10),
            max_work_latency: Duration::from_millis(50),
        }
    }
}

impl From<&PoolConfig> for ConnectionOptions {
    fn from(config: &PoolConfig) -> Self {
        Self {
            unhealthy_rate: config.unhealthy_rate,
            min_work_latency: config.min_work_latency,
            max_work_latency: config.max_work_latency,
        }
    }
}

impl ConnectionOptions {
    fn failure_probability(&self) -> f64 {
        if self.unhealthy_rate.is_nan() {
            0.0
        } else {
            self.unhealthy_rate.clamp(0.0, 1.0)
        }
    }

    fn sample_latency(&self) -> Duration {
        if self.max_work_latency <= self.min_work_latency {
            return self.min_work_latency;
        }
        rand::thread_rng().gen_range(self.min_work_latency..=self.max_work_latency)
    }
}

/// A reusable unit of pooled work.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    closed: AtomicBool,
    options: ConnectionOptions,
    metadata: ConnectionMetadata,
}

impl Connection {
    /// Create a new open connection with the next process-wide identity.
    pub fn new(options: ConnectionOptions) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            closed: AtomicBool::new(false),
            options,
            metadata: ConnectionMetadata::new(),
        }
    }

    /// Unique identity of this connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Close the connection.
    ///
    /// Only the first call succeeds; every later call, including racing
    /// concurrent ones, returns [`ConnectionError::AlreadyClosed`].
    pub fn close(&self) -> Result<(), ConnectionError> {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ConnectionError::AlreadyClosed)
    }

    /// Check if the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Probe the connection's health.
    ///
    /// A closed connection is never healthy. An open one fails the probe
    /// with the configured `unhealthy_rate`, independently on every call.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        !rand::thread_rng().gen_bool(self.options.failure_probability())
    }

    /// Perform one unit of work on the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the connection is closed.
    pub async fn perform_work(&self) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let latency = self.options.sample_latency();
        tokio::time::sleep(latency).await;
        tracing::trace!(connection_id = self.id, ?latency, "work completed");
        Ok(())
    }

    /// Lifecycle metadata for this connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else {
            self.metadata.state
        }
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut ConnectionMetadata {
        &mut self.metadata
    }

    /// Close and mark as discarded. Returns `true` if this call closed it.
    pub(crate) fn discard(&mut self) -> bool {
        self.metadata.mark_closed();
        self.close().is_ok()
    }
}

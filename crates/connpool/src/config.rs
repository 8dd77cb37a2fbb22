//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default maximum number of concurrently borrowed connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Default interval between background sweeps of the idle set.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default probability that a health check reports a connection unhealthy.
pub const DEFAULT_UNHEALTHY_RATE: f64 = 0.10;

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of connections borrowed at the same time.
    ///
    /// A value of zero is replaced by [`DEFAULT_MAX_CONNECTIONS`].
    pub max_connections: usize,

    /// Time to wait for an admission ticket before timing out.
    ///
    /// `None` waits until a ticket frees up or the pool drains.
    pub connection_timeout: Option<Duration>,

    /// Time a connection can sit idle before the sweeper evicts it.
    pub idle_timeout: Option<Duration>,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,

    /// Interval between background sweeps of idle connections.
    pub health_check_interval: Duration,

    /// Probability in `[0, 1]` that a health check fails.
    pub unhealthy_rate: f64,

    /// Lower bound of the simulated latency of a unit of work.
    pub min_work_latency: Duration,

    /// Upper bound of the simulated latency of a unit of work.
    pub max_work_latency: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout: None,
            idle_timeout: None,
            max_lifetime: None,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            unhealthy_rate: DEFAULT_UNHEALTHY_RATE,
            min_work_latency: Duration::from_millis(10),
            max_work_latency: Duration::from_millis(50),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of borrowed connections.
    ///
    /// Zero selects [`DEFAULT_MAX_CONNECTIONS`].
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.max_connections = if count == 0 {
            DEFAULT_MAX_CONNECTIONS
        } else {
            count
        };
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Set the sweep interval.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the probability that a health check reports a failure.
    #[must_use]
    pub fn unhealthy_rate(mut self, rate: f64) -> Self {
        self.unhealthy_rate = rate;
        self
    }

    /// Set the range of simulated work latency.
    #[must_use]
    pub fn work_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_work_latency = min;
        self.max_work_latency = max;
        self
    }

    /// Effective capacity, with zero mapped to the default.
    pub(crate) fn capacity(&self) -> usize {
        if self.max_connections == 0 {
            DEFAULT_MAX_CONNECTIONS
        } else {
            self.max_connections
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.health_check_interval.is_zero() {
            return Err(PoolError::Configuration(
                "health_check_interval must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.unhealthy_rate) {
            return Err(PoolError::Configuration(format!(
                "unhealthy_rate must be within [0, 1], got {}",
                self.unhealthy_rate
            )));
        }
        if self.min_work_latency > self.max_work_latency {
            return Err(PoolError::Configuration(
                "min_work_latency cannot be greater than max_work_latency".into(),
            ));
        }
        Ok(())
    }
}

//! Pool lifecycle counters.
//!
//! Counters are plain atomics updated with `Relaxed` ordering; they are
//! diagnostics only and never drive pool decisions.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct MetricsCollector {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
    acquire_timeouts: AtomicU64,
    health_checks_performed: AtomicU64,
    health_checks_failed: AtomicU64,
    sweeps_run: AtomicU64,
}

impl MetricsCollector {
    pub(crate) fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn checkout_succeeded(&self) {
        self.checkouts_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn checkout_failed(&self) {
        self.checkouts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn acquire_timed_out(&self) {
        self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
        self.checkout_failed();
    }

    pub(crate) fn health_check(&self, healthy: bool) {
        self.health_checks_performed.fetch_add(1, Ordering::Relaxed);
        if !healthy {
            self.health_checks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn sweep_completed(&self) {
        self.sweeps_run.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            checkouts_successful: self.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: self.checkouts_failed.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            health_checks_performed: self.health_checks_performed.load(Ordering::Relaxed),
            health_checks_failed: self.health_checks_failed.load(Ordering::Relaxed),
            sweeps_run: self.sweeps_run.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolMetrics {
    /// Connections created since the pool started.
    pub connections_created: u64,
    /// Connections closed by the pool.
    pub connections_closed: u64,
    /// Acquire calls that returned a connection.
    pub checkouts_successful: u64,
    /// Acquire calls that failed (closed pool or timeout).
    pub checkouts_failed: u64,
    /// Acquire calls that timed out waiting for a ticket.
    pub acquire_timeouts: u64,
    /// Health checks run at release and during sweeps.
    pub health_checks_performed: u64,
    /// Health checks that reported an unhealthy connection.
    pub health_checks_failed: u64,
    /// Completed background sweeps.
    pub sweeps_run: u64,
}

impl PoolMetrics {
    /// Fraction of acquire calls that succeeded, in `[0, 1]`.
    ///
    /// Returns `1.0` when nothing has been acquired yet.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            1.0
        } else {
            self.checkouts_successful as f64 / total as f64
        }
    }

    /// Fraction of health checks that failed, in `[0, 1]`.
    #[must_use]
    pub fn health_check_failure_rate(&self) -> f64 {
        if self.health_checks_performed == 0 {
            0.0
        } else {
            self.health_checks_failed as f64 / self.health_checks_performed as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_rates() {
        let metrics = MetricsCollector::default().snapshot();
        assert_eq!(metrics, PoolMetrics::default());
        assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);
        assert!(metrics.health_check_failure_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters() {
        let collector = MetricsCollector::default();
        collector.connection_created();
        collector.connection_created();
        collector.connection_closed();
        collector.checkout_succeeded();
        collector.checkout_succeeded();
        collector.checkout_succeeded();
        collector.acquire_timed_out();
        collector.health_check(true);
        collector.health_check(false);
        collector.sweep_completed();

        let metrics = collector.snapshot();
        assert_eq!(metrics.connections_created, 2);
        assert_eq!(metrics.connections_closed, 1);
        assert_eq!(metrics.checkouts_successful, 3);
        assert_eq!(metrics.checkouts_failed, 1);
        assert_eq!(metrics.acquire_timeouts, 1);
        assert_eq!(metrics.health_checks_performed, 2);
        assert_eq!(metrics.health_checks_failed, 1);
        assert_eq!(metrics.sweeps_run, 1);
        assert!((metrics.checkout_success_rate() - 0.75).abs() < f64::EPSILON);
        assert!((metrics.health_check_failure_rate() - 0.5).abs() < f64::EPSILON);
    }
}

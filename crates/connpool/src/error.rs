//! Pool and connection error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Failed to acquire a connection within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Pool is draining or drained; no new borrows are admitted.
    #[error("pool closed for new acquires")]
    PoolClosed,

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if this error was caused by the pool being closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    /// Check if this error was caused by an acquisition timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout(_))
    }
}

/// Errors returned by operations on a single [`Connection`](crate::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Work was attempted on a closed connection.
    #[error("cannot use closed connection")]
    Closed,

    /// The connection had already been closed.
    #[error("connection already closed")]
    AlreadyClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_predicates() {
        assert!(PoolError::PoolClosed.is_closed());
        assert!(!PoolError::PoolClosed.is_timeout());

        let timeout = PoolError::AcquisitionTimeout(Duration::from_millis(5));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_closed());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            PoolError::PoolClosed.to_string(),
            "pool closed for new acquires"
        );
        assert_eq!(
            PoolError::Configuration("bad".into()).to_string(),
            "pool configuration error: bad"
        );
        assert_eq!(
            ConnectionError::AlreadyClosed.to_string(),
            "connection already closed"
        );
    }
}

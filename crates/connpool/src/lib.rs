//! # connpool
//!
//! A bounded, reusable connection pool with graceful shutdown.
//!
//! The pool lends out at most a fixed number of connections at a time,
//! recycles healthy connections, discards unhealthy ones and can be drained:
//! new borrows are refused, every borrowed connection is awaited and all
//! idle connections are closed.
//!
//! ## Features
//!
//! - Semaphore-based admission with a fixed capacity
//! - LIFO reuse of idle connections
//! - Health check on every return; unhealthy connections are closed
//! - Background sweep that evicts decayed idle connections
//! - Optional acquisition timeout, idle timeout and maximum lifetime
//! - Idempotent drain that waits for in-flight borrows
//! - Lifecycle counters via [`Pool::metrics`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use connpool::Pool;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Pool::new(10)?;
//!
//! let conn = pool.acquire().await?;
//! conn.perform_work().await?;
//! pool.release(conn);
//!
//! pool.drain().await;
//! assert_eq!(pool.idle_count(), 0);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod pool;

pub use config::PoolConfig;
pub use connection::{Connection, ConnectionOptions};
pub use error::{ConnectionError, PoolError};
pub use lifecycle::{ConnectionMetadata, ConnectionState};
pub use metrics::PoolMetrics;
pub use pool::{Pool, PooledConnection, PoolStatus};

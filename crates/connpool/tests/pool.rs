//! Connection pool behavior tests.
//!
//! Health checks are randomized, so most tests pin `unhealthy_rate` to 0.0
//! or 1.0 to make release outcomes deterministic.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use connpool::{ConnectionError, ConnectionState, Pool, PoolConfig, PoolError};
use tokio_test::{assert_pending, assert_ready_ok};

fn config(capacity: usize) -> PoolConfig {
    PoolConfig::new()
        .max_connections(capacity)
        .unhealthy_rate(0.0)
        .health_check_interval(Duration::from_secs(3600))
        .work_latency(Duration::ZERO, Duration::from_millis(2))
}

fn pool(capacity: usize) -> Pool {
    Pool::with_config(config(capacity)).expect("valid pool config")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

// =============================================================================
// Acquire / Release
// =============================================================================

#[tokio::test]
async fn test_zero_capacity_uses_default() {
    let pool = Pool::new(0).unwrap();
    assert_eq!(pool.status().max, 10);
    assert_eq!(pool.status().tickets_available, 10);
}

#[tokio::test]
async fn test_healthy_release_is_reused() {
    let pool = pool(2);

    let conn = pool.acquire().await.unwrap();
    let id = conn.id();
    assert_eq!(conn.state(), ConnectionState::InUse);
    conn.perform_work().await.unwrap();
    pool.release(conn);

    assert_eq!(pool.idle_count(), 1);

    let again = pool.acquire().await.unwrap();
    assert_eq!(again.id(), id, "should reuse the idle connection");
    assert_eq!(again.metadata().checkout_count, 2);
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn test_idle_reuse_is_lifo() {
    let pool = pool(3);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let c = pool.acquire().await.unwrap();
    let (id_a, id_c) = (a.id(), c.id());

    pool.release(b);
    pool.release(a);
    pool.release(c);

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    assert_eq!(first.id(), id_c);
    assert_eq!(second.id(), id_a);
}

#[tokio::test]
async fn test_unhealthy_release_is_discarded() {
    let pool = Pool::with_config(config(2).unhealthy_rate(1.0)).unwrap();

    let conn = pool.acquire().await.unwrap();
    let id = conn.id();
    pool.release(conn);

    assert_eq!(pool.idle_count(), 0);
    let metrics = pool.metrics();
    assert_eq!(metrics.connections_closed, 1);
    assert_eq!(metrics.health_checks_failed, 1);

    let next = pool.acquire().await.unwrap();
    assert_ne!(next.id(), id);
    assert_eq!(pool.status().tickets_available, 1);
}

#[tokio::test]
async fn test_release_of_closed_connection_frees_ticket() {
    let pool = pool(1);

    let conn = pool.acquire().await.unwrap();
    conn.close().unwrap();
    assert_eq!(conn.perform_work().await, Err(ConnectionError::Closed));
    pool.release(conn);

    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.status().tickets_available, 1);
    assert!(pool.try_acquire().unwrap().is_some());
}

#[tokio::test]
async fn test_dropping_guard_releases() {
    let pool = pool(1);

    {
        let _conn = pool.acquire().await.unwrap();
        assert_eq!(pool.status().in_use, 1);
    }

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 1);
    assert_eq!(status.tickets_available, 1);
}

#[tokio::test]
async fn test_try_acquire_at_capacity() {
    let pool = pool(1);

    let held = pool.try_acquire().unwrap().expect("ticket is free");
    assert!(pool.try_acquire().unwrap().is_none());

    drop(held);
    assert!(pool.try_acquire().unwrap().is_some());
}

#[tokio::test]
async fn test_detach_returns_ticket() {
    let pool = pool(1);

    let conn = pool.acquire().await.unwrap().detach();
    assert!(!conn.is_closed());
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(pool.status().tickets_available, 1);

    let other = pool.try_acquire().unwrap().expect("ticket was returned");
    assert_ne!(other.id(), conn.id());

    drop(other);
    pool.drain().await;
    assert!(!conn.is_closed(), "detached connections are not owned by the pool");
}

// =============================================================================
// Capacity
// =============================================================================

#[tokio::test]
async fn test_third_caller_blocks_until_release() {
    let pool = pool(2);

    let first = pool.acquire().await.unwrap();
    let _second = pool.acquire().await.unwrap();
    let first_id = first.id();

    let mut third = tokio_test::task::spawn(pool.acquire());
    assert_pending!(third.poll());
    assert_pending!(third.poll());

    pool.release(first);
    assert!(third.is_woken());

    let conn = assert_ready_ok!(third.poll());
    assert_eq!(conn.id(), first_id);
}

#[tokio::test]
async fn test_acquire_timeout_at_capacity() {
    let pool = Pool::with_config(config(1).connection_timeout(Duration::from_millis(20))).unwrap();

    let held = pool.acquire().await.unwrap();
    let err = pool.acquire().await.unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, PoolError::AcquisitionTimeout(d) if d == Duration::from_millis(20)));

    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.tickets_available, 0);
    assert_eq!(pool.metrics().acquire_timeouts, 1);

    drop(held);
    assert_eq!(pool.status().tickets_available, 1);
    assert!(pool.acquire_timeout(Duration::from_millis(20)).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_never_exceeds_capacity() {
    const CAPACITY: usize = 3;
    let pool = pool(CAPACITY);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..24 {
        let pool = pool.clone();
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            for _ in 0..3 {
                let conn = pool.acquire().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                conn.perform_work().await.unwrap();
                active.fetch_sub(1, Ordering::SeqCst);
                pool.release(conn);
            }
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked");
    }

    assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.in_use + status.tickets_available, CAPACITY);
    assert!(status.available <= CAPACITY);
    assert_eq!(pool.metrics().checkouts_successful, 72);
}

#[tokio::test]
async fn test_ticket_accounting_at_quiescent_points() {
    let pool = Pool::with_config(config(4).unhealthy_rate(0.5)).unwrap();

    let mut held = Vec::new();
    for round in 0..20 {
        if round % 3 == 2 {
            if let Some(conn) = held.pop() {
                pool.release(conn);
            }
        } else if let Some(conn) = pool.try_acquire().unwrap() {
            held.push(conn);
        }
        let status = pool.status();
        assert_eq!(status.in_use, held.len());
        assert_eq!(status.in_use + status.tickets_available, 4);
    }

    held.clear();
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.tickets_available, 4);
}

// =============================================================================
// Drain
// =============================================================================

#[tokio::test]
async fn test_drain_closes_idle_and_rejects_acquire() {
    let pool = pool(4);
    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    drop(a);
    drop(b);
    assert_eq!(pool.idle_count(), 2);

    pool.drain().await;

    assert!(pool.is_closed());
    assert_eq!(pool.idle_count(), 0);
    assert!(pool.acquire().await.unwrap_err().is_closed());
    assert!(matches!(pool.try_acquire(), Err(PoolError::PoolClosed)));
    assert_eq!(pool.metrics().connections_closed, 2);

    // Later calls are no-ops.
    pool.drain().await;
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn test_drain_wakes_blocked_acquire() {
    let pool = pool(1);
    let held = pool.acquire().await.unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await }
    });
    tokio::task::yield_now().await;

    let drain = tokio::spawn({
        let pool = pool.clone();
        async move { pool.drain().await }
    });

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(PoolError::PoolClosed)));
    assert!(!drain.is_finished());

    drop(held);
    drain.await.unwrap();
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.status().tickets_available, 1);
}

#[tokio::test]
async fn test_drain_with_outstanding_and_idle() {
    let pool = pool(10);

    let mut borrowed = Vec::new();
    for _ in 0..7 {
        borrowed.push(pool.acquire().await.unwrap());
    }
    for conn in borrowed.drain(3..) {
        pool.release(conn);
    }
    assert_eq!(pool.idle_count(), 4);
    assert_eq!(pool.status().in_use, 3);

    let drain = tokio::spawn({
        let pool = pool.clone();
        async move { pool.drain().await }
    });

    wait_until(|| pool.idle_count() == 0).await;
    assert_eq!(pool.metrics().connections_closed, 4);
    assert!(!drain.is_finished(), "drain must wait for borrowed connections");

    for conn in borrowed {
        assert!(!conn.is_closed(), "borrowed connections are never force-closed");
        pool.release(conn);
    }

    tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .expect("drain completes after the last release")
        .unwrap();

    assert_eq!(pool.idle_count(), 0);
    let metrics = pool.metrics();
    assert_eq!(metrics.connections_closed, 7);
    assert_eq!(metrics.connections_created, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_drains_complete_once() {
    let pool = pool(5);

    let borrowed: Vec<_> = {
        let mut v = Vec::new();
        for _ in 0..3 {
            v.push(pool.acquire().await.unwrap());
        }
        v
    };

    let drains: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.drain().await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(pool.is_closed());
    assert!(drains.iter().all(|d| !d.is_finished()));

    for conn in borrowed {
        pool.release(conn);
    }
    for drain in drains {
        tokio::time::timeout(Duration::from_secs(5), drain)
            .await
            .expect("every drain caller observes completion")
            .unwrap();
    }

    assert_eq!(pool.idle_count(), 0);
    let metrics = pool.metrics();
    assert_eq!(metrics.connections_created, 3);
    assert_eq!(metrics.connections_closed, 3, "no connection closed twice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_drain_during_load_does_not_deadlock() {
    let pool = pool(4);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            loop {
                match pool.acquire().await {
                    Ok(conn) => {
                        conn.perform_work().await.unwrap();
                        pool.release(conn);
                    }
                    Err(err) => {
                        assert!(err.is_closed());
                        break;
                    }
                }
            }
        }));
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    tokio::time::timeout(Duration::from_secs(5), pool.drain())
        .await
        .expect("drain finishes under load");

    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("callers stop once the pool is closed")
            .unwrap();
    }

    let status = pool.status();
    assert_eq!(status.available, 0);
    assert_eq!(status.in_use, 0);
    let metrics = pool.metrics();
    assert_eq!(metrics.connections_created, metrics.connections_closed);
}

// =============================================================================
// Background sweep
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sweep_evicts_idle_expired_connections() {
    let pool = Pool::with_config(
        config(4)
            .health_check_interval(Duration::from_millis(50))
            .idle_timeout(Duration::from_millis(100)),
    )
    .unwrap();

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    drop(a);
    drop(b);
    assert_eq!(pool.idle_count(), 2);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(pool.idle_count(), 2, "not yet past the idle timeout");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(pool.idle_count(), 0);

    let metrics = pool.metrics();
    assert!(metrics.sweeps_run >= 2);
    assert_eq!(metrics.connections_closed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_release_discards_connections_past_max_lifetime() {
    let pool = Pool::with_config(config(1).max_lifetime(Duration::from_millis(100))).unwrap();

    let conn = pool.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    pool.release(conn);

    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.metrics().connections_closed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_stops_after_drain() {
    let pool = Pool::with_config(config(2).health_check_interval(Duration::from_millis(50))).unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    let before = pool.metrics().sweeps_run;
    assert!(before >= 2);

    pool.drain().await;
    let after_drain = pool.metrics().sweeps_run;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(pool.metrics().sweeps_run, after_drain);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_during_load_and_drain_leaves_nothing_open() {
    const CAPACITY: usize = 6;
    let pool = Pool::with_config(
        config(CAPACITY)
            .unhealthy_rate(0.05)
            .health_check_interval(Duration::from_millis(1)),
    )
    .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let sampler = {
        let pool = pool.clone();
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            let mut samples = 0_usize;
            while !stop.load(Ordering::SeqCst) {
                assert!(pool.idle_count() <= CAPACITY);
                samples += 1;
                tokio::task::yield_now().await;
            }
            samples
        })
    };

    let mut handles = Vec::new();
    for _ in 0..24 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            while let Ok(conn) = pool.acquire().await {
                let _ = conn.perform_work().await;
                pool.release(conn);
            }
        }));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_secs(5), pool.drain())
        .await
        .expect("drain finishes while the sweeper runs");

    let metrics = pool.metrics();
    assert_eq!(metrics.connections_created, metrics.connections_closed);
    assert_eq!(pool.idle_count(), 0);
    assert!(metrics.sweeps_run > 0);

    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("callers stop once the pool is closed")
            .unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    assert!(sampler.await.unwrap() > 0);

    let metrics = pool.metrics();
    assert_eq!(metrics.connections_created, metrics.connections_closed);
    assert_eq!(pool.status().in_use, 0);
}

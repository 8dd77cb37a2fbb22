//! Concurrent clients sharing one pool, with graceful shutdown.
//!
//! Five clients each borrow a connection three times, do some work and give
//! it back. Ctrl-C interrupts the run; either way the pool is drained once
//! and the final idle count is printed.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=connpool=debug cargo run --example client_demo
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use connpool::{Pool, PoolConfig};
use rand::Rng;
use tokio::task::JoinSet;

const CLIENT_COUNT: usize = 5;
const ROUNDS: usize = 3;

async fn client(id: usize, pool: Pool) {
    for _ in 0..ROUNDS {
        let conn = match pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                println!("Client {id}: failed to acquire connection: {e}");
                return;
            }
        };
        println!("Client {id}: acquired conn {}", conn.id());

        if let Err(e) = conn.perform_work().await {
            println!("Client {id}: error using conn: {e}");
        }

        let pause = Duration::from_millis(rand::thread_rng().gen_range(25..75));
        tokio::time::sleep(pause).await;
        pool.release(conn);
    }
    println!("Client {id}: done");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let pool = Pool::with_config(PoolConfig::new().max_connections(10))?;

    let mut clients = JoinSet::new();
    for id in 0..CLIENT_COUNT {
        clients.spawn(client(id, pool.clone()));
    }

    tokio::select! {
        () = async { while clients.join_next().await.is_some() {} } => {
            println!("All clients completed.");
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            println!("Shutdown signal caught, draining pool...");
        }
    }

    pool.drain().await;
    println!("Drained pool. Idle count: {}", pool.idle_count());

    let metrics = pool.metrics();
    println!(
        "Connections created: {}, closed: {}, health checks failed: {}/{}",
        metrics.connections_created,
        metrics.connections_closed,
        metrics.health_checks_failed,
        metrics.health_checks_performed
    );

    Ok(())
}

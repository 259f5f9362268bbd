//! Connection acquisition with retry and jittered backoff.
//!
//! Every slot holds a dedicated connection obtained through
//! [`ConnectionManager::acquire`], and hands it back through
//! [`ConnectionManager::release`]. There is no client-side pool in between:
//! each attempt is exactly one connection handshake with the server.

use crate::config::BenchConfig;
use crate::error::{BenchError, BenchResult};
use async_trait::async_trait;
use rand::Rng;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of dedicated connections.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Send + 'static;

    /// Make one attempt at obtaining a connection.
    async fn connect(&self) -> Result<Self::Conn, sqlx::Error>;

    /// Close a connection for good.
    async fn close(&self, conn: Self::Conn) -> Result<(), sqlx::Error>;

    /// Shut down whatever backs this connector.
    async fn shutdown(&self) {}
}

/// PostgreSQL connector opening one physical connection per attempt.
///
/// Connections are never capped, reaped or aged out on the client side, so
/// a refused attempt carries the server's own error.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    /// Parse the connection URL. No connection is made until the first
    /// attempt.
    pub fn new(config: &BenchConfig) -> BenchResult<Self> {
        let options = config
            .database_url
            .parse::<PgConnectOptions>()
            .map_err(|e| BenchError::Config(format!("Error parsing database URL: {e}")))?;

        Ok(Self::from_options(options))
    }

    pub fn from_options(options: PgConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgConnection;

    async fn connect(&self) -> Result<Self::Conn, sqlx::Error> {
        PgConnection::connect_with(&self.options).await
    }

    async fn close(&self, conn: Self::Conn) -> Result<(), sqlx::Error> {
        conn.close().await
    }
}

/// Randomised delay between acquisition attempts.
///
/// After the k-th failed attempt the delay is the sum of k independent
/// uniform [0, 1) draws, scaled by `unit`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    unit: Duration,
}

impl Backoff {
    pub fn new(unit: Duration) -> Self {
        Self { unit }
    }

    pub fn delay(&self, failed_attempts: u32) -> Duration {
        let mut rng = rand::rng();
        let draws: f64 = (0..failed_attempts).map(|_| rng.random::<f64>()).sum();
        self.unit.mul_f64(draws)
    }
}

/// Acquires and releases dedicated connections.
pub struct ConnectionManager<K> {
    connector: K,
    retries: u32,
    backoff: Backoff,
}

impl<K: Connector> ConnectionManager<K> {
    pub fn new(connector: K, config: &BenchConfig) -> Self {
        Self {
            connector,
            retries: config.connect_retries.max(1),
            backoff: Backoff::new(config.backoff_unit),
        }
    }

    /// Obtain one connection, retrying with backoff.
    ///
    /// Fails with [`BenchError::Connection`] carrying the last cause once
    /// every attempt is used up.
    pub async fn acquire(&self) -> BenchResult<K::Conn> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connector.connect().await {
                Ok(conn) => {
                    if attempt > 1 {
                        debug!(attempt, "connection acquired after retry");
                    }
                    return Ok(conn);
                }
                Err(source) if attempt >= self.retries => {
                    return Err(BenchError::Connection {
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(attempt, ?delay, error = %e, "connection attempt failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Obtain `n` distinct connections. On failure the ones already held
    /// are released before the error is returned.
    pub async fn acquire_many(&self, n: usize) -> BenchResult<Vec<K::Conn>> {
        let mut conns = Vec::with_capacity(n);
        for _ in 0..n {
            match self.acquire().await {
                Ok(conn) => conns.push(conn),
                Err(e) => {
                    self.release_all(conns).await;
                    return Err(e);
                }
            }
        }
        info!(count = n, "connections established");
        Ok(conns)
    }

    /// Close one connection. Failures are logged and swallowed.
    pub async fn release(&self, conn: K::Conn) {
        if let Err(e) = self.connector.close(conn).await {
            warn!(error = %e, "Error closing connection");
        }
    }

    pub async fn release_all(&self, conns: impl IntoIterator<Item = K::Conn>) {
        for conn in conns {
            self.release(conn).await;
        }
    }

    pub async fn shutdown(&self) {
        self.connector.shutdown().await;
    }
}

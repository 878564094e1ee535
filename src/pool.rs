//! Fixed-size pool of `may_postgres` clients.
//!
//! Idle clients sit in a bounded crossbeam channel. [`ConnectionPool::get`]
//! takes one out (waiting up to the checkout timeout) and the returned
//! [`PooledClient`] puts it back when dropped.

use crate::config::DatabaseConfig;
use crate::connection::{connect, ConnectionError};
use crate::executor::StoreError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use may_postgres::Client;
use std::ops::Deref;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

pub struct ConnectionPool {
    idle_tx: Sender<Client>,
    idle_rx: Receiver<Client>,
    size: usize,
    checkout_timeout: Duration,
}

impl ConnectionPool {
    /// Open `max_connections` clients up front.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the URL is invalid or any connection
    /// fails.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        if config.max_connections == 0 {
            return Err(ConnectionError::Other(
                "max_connections must be at least 1".to_string(),
            ));
        }
        let mut clients = Vec::with_capacity(config.max_connections);
        for _ in 0..config.max_connections {
            clients.push(connect(&config.url)?);
        }
        log::info!(
            "Connection pool ready with {} connections",
            config.max_connections
        );
        Ok(Self::from_clients(clients, config.pool_timeout()))
    }

    /// Build a pool from already-open clients.
    pub fn from_clients(clients: Vec<Client>, checkout_timeout: Duration) -> Self {
        let size = clients.len();
        let (idle_tx, idle_rx) = bounded(size.max(1));
        for client in clients {
            // capacity equals the number of clients
            let _ = idle_tx.try_send(client);
        }
        Self {
            idle_tx,
            idle_rx,
            size,
            checkout_timeout,
        }
    }

    /// Check out a client.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::PoolExhausted` when no client is returned within
    /// the checkout timeout.
    pub fn get(&self) -> Result<PooledClient<'_>, StoreError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::acquire_connection_span().entered();

        let start = Instant::now();
        let client = match self.idle_rx.recv_timeout(self.checkout_timeout) {
            Ok(client) => client,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "No connection available after {}ms ({} in pool)",
                    self.checkout_timeout.as_millis(),
                    self.size
                );
                return Err(StoreError::PoolExhausted(self.checkout_timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(StoreError::Other("connection pool closed".to_string()))
            }
        };

        #[cfg(feature = "metrics")]
        METRICS.record_pool_wait(start.elapsed());
        #[cfg(not(feature = "metrics"))]
        let _ = start;

        Ok(PooledClient {
            client: Some(client),
            pool: self,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Clients currently checked in.
    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }
}

/// A checked-out client, returned to the pool on drop.
pub struct PooledClient<'a> {
    client: Option<Client>,
    pool: &'a ConnectionPool,
}

impl Deref for PooledClient<'_> {
    type Target = Client;

    fn deref(&self) -> &Client {
        // only taken in drop
        match &self.client {
            Some(client) => client,
            None => unreachable!("pooled client used after release"),
        }
    }
}

impl Drop for PooledClient<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if self.pool.idle_tx.try_send(client).is_err() {
                log::warn!("Dropping connection: pool already full");
            }
        }
    }
}

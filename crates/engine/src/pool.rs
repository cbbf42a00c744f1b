//! Bounded pool of storage clients.
//!
//! A semaphore sized `num_clients` bounds the number of clients checked out
//! at once. Healthy clients are returned to an idle stack before their permit
//! is released, so the number of live clients (idle plus checked out) never
//! exceeds the pool size.

use crate::error::PoolError;
use rodwatch_core::config::EngineConfig;
use rodwatch_storage::{ClientFactory, StorageClient, StorageError};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Pool sizing and retry settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub acquire_timeout: Duration,
    pub max_connect_attempts: u32,
    /// Base delay between connection attempts; grows linearly per attempt.
    pub connect_backoff: Duration,
}

impl PoolConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            size: config.num_clients,
            acquire_timeout: config.acquire_timeout(),
            max_connect_attempts: config.max_connect_attempts,
            connect_backoff: Duration::from_millis(100),
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub created: u64,
    pub discarded: u64,
    pub acquired: u64,
    pub timeouts: u64,
    pub connect_failures: u64,
    pub idle: usize,
    pub in_use: usize,
    pub peak_in_use: usize,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    discarded: AtomicU64,
    acquired: AtomicU64,
    timeouts: AtomicU64,
    connect_failures: AtomicU64,
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
}

struct PoolInner {
    factory: Arc<dyn ClientFactory>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn StorageClient>>>,
    closed: AtomicBool,
    config: PoolConfig,
    counters: Counters,
}

impl PoolInner {
    fn pop_idle(&self) -> Option<Box<dyn StorageClient>> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }

    fn push_idle(&self, client: Box<dyn StorageClient>) {
        if self.closed.load(Ordering::SeqCst) {
            self.discard(client);
            return;
        }
        match self.idle.lock() {
            Ok(mut idle) => idle.push(client),
            Err(_) => self.discard(client),
        }
    }

    fn discard(&self, client: Box<dyn StorageClient>) {
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        debug!(backend = client.backend_name(), "Discarding storage client");
        drop(client);
    }
}

/// A fixed-size pool of storage clients shared by all workers.
#[derive(Clone)]
pub struct ClientPool {
    inner: Arc<PoolInner>,
}

impl ClientPool {
    pub fn new(factory: Arc<dyn ClientFactory>, config: PoolConfig) -> Self {
        let size = config.size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                factory,
                semaphore: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(Vec::with_capacity(size)),
                closed: AtomicBool::new(false),
                config: PoolConfig { size, ..config },
                counters: Counters::default(),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.config.size
    }

    /// Check out a client, waiting at most the configured acquire timeout.
    ///
    /// Idle clients are reused after a health check; otherwise a new client
    /// is created, retrying up to `max_connect_attempts` times.
    pub async fn acquire(&self) -> Result<PooledClient, PoolError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let timeout = self.inner.config.acquire_timeout;
        let permit = match tokio::time::timeout(
            timeout,
            Arc::clone(&self.inner.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    "Timed out waiting for a storage client"
                );
                return Err(PoolError::Timeout(timeout));
            }
        };

        let client = self.checkout_client().await?;

        let counters = &self.inner.counters;
        counters.acquired.fetch_add(1, Ordering::Relaxed);
        let in_use = counters.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_use.fetch_max(in_use, Ordering::SeqCst);

        Ok(PooledClient {
            client: Some(client),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    async fn checkout_client(&self) -> Result<Box<dyn StorageClient>, PoolError> {
        while let Some(client) = self.inner.pop_idle() {
            match client.health_check().await {
                Ok(()) => return Ok(client),
                Err(e) => {
                    warn!(error = %e, "Idle storage client failed health check");
                    self.inner.discard(client);
                }
            }
        }
        self.create().await
    }

    async fn create(&self) -> Result<Box<dyn StorageClient>, PoolError> {
        let max_attempts = self.inner.config.max_connect_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.inner.factory.connect().await {
                Ok(client) => {
                    self.inner.counters.created.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        backend = self.inner.factory.backend_name(),
                        attempt,
                        "Created storage client"
                    );
                    return Ok(client);
                }
                Err(e) => {
                    self.inner
                        .counters
                        .connect_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        backend = self.inner.factory.backend_name(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Failed to create storage client"
                    );
                    last_error = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.inner.config.connect_backoff * attempt).await;
                    }
                }
            }
        }

        Err(PoolError::Exhausted {
            attempts: max_attempts,
            source: last_error.unwrap_or_else(|| {
                StorageError::Transport("no connection attempt made".to_string())
            }),
        })
    }

    /// Close the pool. Pending and future `acquire` calls fail with
    /// [`PoolError::Closed`]; idle clients are dropped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.semaphore.close();
        let idle: Vec<_> = match self.inner.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for client in idle {
            self.inner.discard(client);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        PoolStats {
            size: self.inner.config.size,
            created: counters.created.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
            acquired: counters.acquired.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            connect_failures: counters.connect_failures.load(Ordering::Relaxed),
            idle: self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0),
            in_use: counters.in_use.load(Ordering::SeqCst),
            peak_in_use: counters.peak_in_use.load(Ordering::SeqCst),
        }
    }
}

/// A checked-out client.
///
/// Call [`PooledClient::release`] when done. Dropping the guard without
/// releasing it (early return, panic, cancellation) discards the client.
pub struct PooledClient {
    client: Option<Box<dyn StorageClient>>,
    pool: Arc<PoolInner>,
    // Dropped after `client` has been returned to the idle stack.
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    /// Return the client to the pool, or discard it if it is unhealthy.
    pub fn release(mut self, healthy: bool) {
        if let Some(client) = self.client.take() {
            self.pool.counters.in_use.fetch_sub(1, Ordering::SeqCst);
            if healthy {
                self.pool.push_idle(client);
            } else {
                self.pool.discard(client);
            }
        }
    }

    /// Release according to the outcome of the last storage call.
    pub fn release_after(self, error: Option<&StorageError>) {
        self.release(!error.is_some_and(StorageError::is_transient));
    }
}

impl Deref for PooledClient {
    type Target = dyn StorageClient;

    fn deref(&self) -> &Self::Target {
        match self.client.as_deref() {
            Some(client) => client,
            None => unreachable!("pooled client used after release"),
        }
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.counters.in_use.fetch_sub(1, Ordering::SeqCst);
            self.pool.discard(client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rodwatch_storage::{MemoryFactory, MemoryZone};

    fn pool(zone: &MemoryZone, size: usize, timeout: Duration) -> ClientPool {
        ClientPool::new(
            Arc::new(MemoryFactory::new(zone.clone())),
            PoolConfig {
                size,
                acquire_timeout: timeout,
                max_connect_attempts: 3,
                connect_backoff: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_released_clients_are_reused() {
        let zone = MemoryZone::new();
        let pool = pool(&zone, 2, Duration::from_secs(1));

        for _ in 0..5 {
            let client = pool.acquire().await.unwrap();
            client.health_check().await.unwrap();
            client.release(true);
        }

        assert_eq!(zone.connect_count(), 1);
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.acquired, 5);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_unhealthy_and_dropped_clients_are_discarded() {
        let zone = MemoryZone::new();
        let pool = pool(&zone, 1, Duration::from_secs(1));

        pool.acquire().await.unwrap().release(false);
        assert_eq!(zone.live_clients(), 0);

        {
            let _client = pool.acquire().await.unwrap();
        }
        assert_eq!(zone.live_clients(), 0);
        assert_eq!(pool.stats().discarded, 2);
        assert_eq!(zone.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_pool_is_busy() {
        let zone = MemoryZone::new();
        let pool = pool(&zone, 1, Duration::from_millis(20));

        let held = pool.acquire().await.unwrap();
        match pool.acquire().await {
            Err(PoolError::Timeout(_)) => {}
            Err(other) => panic!("expected timeout, got {other:?}"),
            Ok(_) => panic!("expected timeout, got a client"),
        }
        held.release(true);
        assert!(pool.acquire().await.is_ok());
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_connect_retries_then_exhausts() {
        let zone = MemoryZone::new();
        let pool = pool(&zone, 1, Duration::from_secs(1));

        zone.fail_connections(2);
        pool.acquire().await.unwrap().release(true);
        assert_eq!(pool.stats().connect_failures, 2);

        pool.close();
        let pool = self::pool(&zone, 1, Duration::from_secs(1));
        zone.fail_connections(3);
        match pool.acquire().await {
            Err(PoolError::Exhausted { attempts: 3, .. }) => {}
            Err(other) => panic!("expected exhausted, got {other:?}"),
            Ok(_) => panic!("expected exhausted, got a client"),
        }
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_future_acquires() {
        let zone = MemoryZone::new();
        let pool = pool(&zone, 1, Duration::from_secs(5));

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|c| c.release(true)) })
        };
        tokio::task::yield_now().await;
        pool.close();

        match waiter.await.unwrap() {
            Err(PoolError::Closed) => {}
            other => panic!("expected closed, got {other:?}"),
        }
        held.release(true);
        assert_eq!(zone.live_clients(), 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}

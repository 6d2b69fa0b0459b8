//! Connection pool wrapper.
//!
//! Owns the lazily-created native driver, tracks the live-lease count, and
//! implements the graceful drain-then-close protocol. The driver is recreated
//! on the next acquire after a close, so `Closed` is not terminal.

use crate::db::client::{Client, LeasedClient};
use crate::db::driver::{PoolDriver, PooledConnection};
use crate::error::{DbError, DbResult};
use crate::retry::{RetryPolicy, retry_until};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Maximum acquisition retries under pool exhaustion.
pub const MAX_ACQUIRE_RETRIES: u32 = 3;

/// Bounded retry count for each close-protocol wait.
pub const DRAIN_RETRIES: u32 = 3;

/// Pool lifecycle. `Closed` transitions back to `Active` on the next acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Uncreated,
    Active,
    Draining,
    Closed,
}

type DriverFactory = Box<dyn Fn() -> Arc<dyn PoolDriver> + Send + Sync>;

/// Wrapper around one native pool instance with lease accounting and a
/// best-effort drain on close.
pub struct ConnectionPool {
    label: String,
    factory: DriverFactory,
    driver: Mutex<Option<Arc<dyn PoolDriver>>>,
    state: Mutex<PoolState>,
    leased: Arc<AtomicUsize>,
}

impl ConnectionPool {
    /// Create a pool wrapper. The driver itself is not created until the
    /// first acquire.
    pub fn new(
        label: impl Into<String>,
        factory: impl Fn() -> Arc<dyn PoolDriver> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            factory: Box::new(factory),
            driver: Mutex::new(None),
            state: Mutex::new(PoolState::Uncreated),
            leased: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        *self.state.lock().unwrap()
    }

    /// Number of currently leased connections.
    pub fn leased_count(&self) -> usize {
        self.leased.load(Ordering::Acquire)
    }

    /// Get the native driver, creating it on first use.
    pub(crate) fn driver(&self) -> Arc<dyn PoolDriver> {
        let mut guard = self.driver.lock().unwrap();
        if let Some(driver) = guard.as_ref() {
            return Arc::clone(driver);
        }
        debug!(pool = %self.label, "Creating database connection pool");
        let driver = (self.factory)();
        *guard = Some(Arc::clone(&driver));
        *self.state.lock().unwrap() = PoolState::Active;
        driver
    }

    /// Lease a connection.
    ///
    /// Exhaustion failures (SQLSTATE 53300) are retried up to
    /// [`MAX_ACQUIRE_RETRIES`] times with the default backoff; any other
    /// failure propagates immediately. The returned client must be released
    /// exactly once.
    pub async fn acquire(&self) -> DbResult<Box<dyn Client>> {
        let driver = self.driver();

        let policy: RetryPolicy<Box<dyn PooledConnection>, DbError> =
            RetryPolicy::new().with_retry(|error: Option<&DbError>, attempt| match error {
                Some(e) if e.is_too_many_connections() => {
                    if attempt < MAX_ACQUIRE_RETRIES {
                        debug!(attempt, "Too many clients already, retrying connection to database");
                    } else {
                        debug!(attempt, "Too many clients already, retries exhausted");
                    }
                    attempt < MAX_ACQUIRE_RETRIES
                }
                _ => false,
            });

        let conn = match retry_until(|| driver.connect(), &policy).await {
            Ok(conn) => conn,
            Err(error) => {
                debug!(pool = %self.label, error = %error, "Client acquisition failed");
                return Err(error);
            }
        };

        let count = self.leased.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(pool = %self.label, leased = count, "Database client acquired");
        Ok(Box::new(LeasedClient::new(conn, Arc::clone(&self.leased))))
    }

    /// Drain and close the pool. Idempotent when no driver exists.
    ///
    /// Waits (bounded) for leases and waiting acquirers to clear, ends the
    /// native pool, waits (bounded) for idle connections to drain, then drops
    /// the driver and resets the lease count. The waits are best effort: the
    /// protocol proceeds whether or not the predicates were satisfied.
    pub async fn close(&self) {
        let driver = {
            let guard = self.driver.lock().unwrap();
            guard.as_ref().map(Arc::clone)
        };
        let Some(driver) = driver else {
            return;
        };
        *self.state.lock().unwrap() = PoolState::Draining;

        let settled = RetryPolicy::<bool, DbError>::times(DRAIN_RETRIES)
            .with_accept(|drained: &bool, _| *drained);
        let drained = retry_until(
            || {
                let quiet = self.leased.load(Ordering::Acquire) == 0
                    && driver.waiting_count() == 0;
                std::future::ready(Ok::<_, DbError>(quiet))
            },
            &settled,
        )
        .await;
        if let Ok(false) = drained {
            debug!(
                pool = %self.label,
                leased = self.leased.load(Ordering::Acquire),
                waiting = driver.waiting_count(),
                "Pool not quiescent after bounded wait, closing anyway"
            );
        }

        driver.end().await;

        let settled = RetryPolicy::<bool, DbError>::times(DRAIN_RETRIES)
            .with_accept(|drained: &bool, _| *drained);
        let idle_drained = retry_until(
            || std::future::ready(Ok::<_, DbError>(driver.idle_count() == 0)),
            &settled,
        )
        .await;
        if let Ok(false) = idle_drained {
            debug!(
                pool = %self.label,
                idle = driver.idle_count(),
                "Idle connections not fully drained"
            );
        }

        *self.driver.lock().unwrap() = None;
        self.leased.store(0, Ordering::Release);
        *self.state.lock().unwrap() = PoolState::Closed;
        debug!(pool = %self.label, "Database connection pool closed");
    }
}

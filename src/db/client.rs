//! Client capability chain.
//!
//! A leased connection is wrapped in a fixed decoration order: the raw
//! [`LeasedClient`] innermost, then deadlock retry, then either statement
//! logging (when configured) or profiling. Every layer exposes the same
//! `query`/`release` contract and forwards `release` unchanged, so callers
//! never know how deep the chain is.

use crate::db::driver::PooledConnection;
use crate::db::types::{Row, SqlParam};
use crate::error::{DbError, DbResult};
use crate::retry::{RetryPolicy, retry_until};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Maximum deadlock retries per statement.
pub const MAX_DEADLOCK_RETRIES: u32 = 3;

/// Queries slower than this are logged by the profiling layer.
pub const SLOW_QUERY_THRESHOLD_MS: u128 = 4000;

/// The client capability interface shared by the raw leased connection and
/// every decorator above it.
#[async_trait]
pub trait Client: Send + Sync {
    /// Execute a parameterized statement and return the result rows.
    async fn query(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<Row>>;

    /// Return the underlying connection to the pool. Consumes the client;
    /// a lease is released exactly once.
    async fn release(self: Box<Self>);
}

impl std::fmt::Debug for dyn Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Client")
    }
}

/// The innermost chain node: a leased native connection plus the pool's
/// lease counter.
pub struct LeasedClient {
    conn: Mutex<Box<dyn PooledConnection>>,
    leased: Arc<AtomicUsize>,
}

impl LeasedClient {
    pub(crate) fn new(conn: Box<dyn PooledConnection>, leased: Arc<AtomicUsize>) -> Self {
        Self {
            conn: Mutex::new(conn),
            leased,
        }
    }
}

#[async_trait]
impl Client for LeasedClient {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<Row>> {
        let mut conn = self.conn.lock().await;
        conn.query(sql, params).await
    }

    async fn release(self: Box<Self>) {
        let LeasedClient { conn, leased } = *self;
        conn.into_inner().release().await;

        // saturate at zero; an extra return is a bug worth surfacing
        let previous = leased.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
            Some(count.saturating_sub(1))
        });
        match previous {
            Ok(0) => warn!("Lease count underflow on release"),
            Ok(count) => debug!(leased = count - 1, "Database client released"),
            Err(_) => {}
        }
    }
}

/// Deadlock-retry layer: retries SQLSTATE 40P01 failures a bounded number of
/// times with the default backoff.
pub struct RetryClient {
    inner: Box<dyn Client>,
    policy: RetryPolicy<Vec<Row>, DbError>,
}

impl RetryClient {
    pub fn new(inner: Box<dyn Client>) -> Self {
        let policy = RetryPolicy::new().with_retry(|error: Option<&DbError>, attempt| {
            match error {
                Some(e) if e.is_deadlock() => {
                    if attempt < MAX_DEADLOCK_RETRIES {
                        debug!(attempt, "Deadlock detected, retrying statement");
                    } else {
                        debug!(attempt, "Deadlock detected, retries exhausted");
                    }
                    attempt < MAX_DEADLOCK_RETRIES
                }
                _ => false,
            }
        });
        Self { inner, policy }
    }
}

#[async_trait]
impl Client for RetryClient {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<Row>> {
        retry_until(|| self.inner.query(sql, params), &self.policy).await
    }

    async fn release(self: Box<Self>) {
        self.inner.release().await
    }
}

/// Profiling layer: logs the wall-clock duration of slow statements.
pub struct ProfiledClient {
    inner: Box<dyn Client>,
}

impl ProfiledClient {
    pub fn new(inner: Box<dyn Client>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Client for ProfiledClient {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<Row>> {
        let started = Instant::now();
        let result = self.inner.query(sql, params).await;
        let elapsed_ms = started.elapsed().as_millis();
        if elapsed_ms > SLOW_QUERY_THRESHOLD_MS {
            debug!(elapsed_ms = elapsed_ms as u64, "Slow database query");
        }
        result
    }

    async fn release(self: Box<Self>) {
        self.inner.release().await
    }
}

/// Statement-logging layer: renders the statement with its parameters
/// substituted in and logs it before delegating.
pub struct LoggedClient {
    inner: Box<dyn Client>,
}

impl LoggedClient {
    pub fn new(inner: Box<dyn Client>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Client for LoggedClient {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<Row>> {
        debug!(statement = %render_statement(sql, params), "Executing statement");
        self.inner.query(sql, params).await
    }

    async fn release(self: Box<Self>) {
        self.inner.release().await
    }
}

/// Wrap a freshly leased client in the standard capability chain:
/// retry, then logging when enabled, else profiling.
pub fn decorate_client(client: Box<dyn Client>, log_queries: bool) -> Box<dyn Client> {
    let client: Box<dyn Client> = Box::new(RetryClient::new(client));
    if log_queries {
        Box::new(LoggedClient::new(client))
    } else {
        Box::new(ProfiledClient::new(client))
    }
}

/// Render a statement with positional parameters substituted in place.
/// String arguments are quoted, numeric arguments are not.
pub fn render_statement(sql: &str, params: &[SqlParam]) -> String {
    let mut rendered = sql.to_string();
    // substitute higher placeholders first so $1 does not clobber $10
    for (index, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", index + 1);
        rendered = rendered.replace(&placeholder, &render_param(param));
    }
    rendered
}

fn render_param(param: &SqlParam) -> String {
    match param {
        SqlParam::Null => "NULL".to_string(),
        SqlParam::Bool(v) => v.to_string(),
        SqlParam::Int(v) => v.to_string(),
        SqlParam::Float(v) => v.to_string(),
        SqlParam::String(v) => format!("'{}'", v),
        SqlParam::Bytes(v) => {
            let hex: String = v.iter().map(|b| format!("{:02x}", b)).collect();
            format!("'\\x{}'", hex)
        }
        SqlParam::Json(v) => format!("'{}'", v),
    }
}

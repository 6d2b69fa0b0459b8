//! Scripted driver fakes shared by the integration tests.

use async_trait::async_trait;
use pglease::db::{PoolDriver, PooledConnection};
use pglease::{DbError, DbResult, Row, SqlParam};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Per-statement behavior shared by every connection a driver hands out.
#[derive(Default)]
pub struct QueryScript {
    failures: Mutex<HashMap<String, VecDeque<DbError>>>,
    results: Mutex<HashMap<String, Vec<Row>>>,
    log: Mutex<Vec<String>>,
}

impl QueryScript {
    /// Queue an error for the next execution of `sql`.
    pub fn fail(&self, sql: &str, error: DbError) {
        self.failures
            .lock()
            .unwrap()
            .entry(sql.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fix the rows returned by successful executions of `sql`.
    pub fn result(&self, sql: &str, rows: Vec<Row>) {
        self.results.lock().unwrap().insert(sql.to_string(), rows);
    }

    /// Every statement executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// How many times `sql` has been executed.
    pub fn count(&self, sql: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|s| *s == sql).count()
    }
}

/// Fake pool driver with scripted connect failures and query behavior.
pub struct ScriptedDriver {
    pub script: Arc<QueryScript>,
    connect_failures: Mutex<VecDeque<DbError>>,
    pub connects: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
    pub ended: AtomicBool,
    pub idle: AtomicUsize,
    pub waiting: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(QueryScript::default()),
            connect_failures: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            ended: AtomicBool::new(false),
            idle: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        })
    }

    /// Queue an error for the next lease attempt.
    pub fn fail_connect(&self, error: DbError) {
        self.connect_failures.lock().unwrap().push_back(error);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolDriver for ScriptedDriver {
    async fn connect(&self) -> DbResult<Box<dyn PooledConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.connect_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&self.script),
            releases: Arc::clone(&self.releases),
        }))
    }

    fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn idle_count(&self) -> usize {
        self.idle.load(Ordering::SeqCst)
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.idle.store(0, Ordering::SeqCst);
    }
}

struct ScriptedConnection {
    script: Arc<QueryScript>,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl PooledConnection for ScriptedConnection {
    async fn query(&mut self, sql: &str, _params: &[SqlParam]) -> DbResult<Vec<Row>> {
        self.script.log.lock().unwrap().push(sql.to_string());
        if let Some(queue) = self.script.failures.lock().unwrap().get_mut(sql) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        Ok(self
            .script
            .results
            .lock()
            .unwrap()
            .get(sql)
            .cloned()
            .unwrap_or_default())
    }

    async fn release(self: Box<Self>) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// SQLSTATE 40P01.
pub fn deadlock() -> DbError {
    DbError::database("deadlock detected", Some("40P01".to_string()))
}

/// SQLSTATE 53300.
pub fn exhaustion() -> DbError {
    DbError::database("sorry, too many clients already", Some("53300".to_string()))
}

/// Initialize test logging once; respects RUST_LOG.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

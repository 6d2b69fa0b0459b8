//! Database facade.
//!
//! `DatabaseManager` composes the pool, the capability chain, the statement
//! binder, and the transaction machinery into the surface handed to
//! application code: the bound statement groups, `query_raw`,
//! `begin_transact`/`transact`, and `close`. At most one transaction is
//! tracked per manager at a time.

use crate::config::DatabaseConfig;
use crate::db::client::{Client, decorate_client};
use crate::db::driver::{PoolDriver, SqlxPoolDriver};
use crate::db::pool::ConnectionPool;
use crate::db::query;
use crate::db::statements::{
    BoundStatement, BoundStatements, ClientBinding, ClientProvider, StatementGroups,
    bind_statements,
};
use crate::db::transaction::Transaction;
use crate::db::types::{Row, SqlParam};
use crate::error::DbResult;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

struct ManagerInner {
    schema: String,
    log_queries: bool,
    pool: ConnectionPool,
    current: Mutex<Option<Transaction>>,
}

impl ManagerInner {
    /// Lease a connection and wrap it in the capability chain.
    async fn acquire_client(&self) -> DbResult<Box<dyn Client>> {
        let client = self.pool.acquire().await?;
        Ok(decorate_client(client, self.log_queries))
    }
}

/// Facade over one schema's pooled database access.
pub struct DatabaseManager {
    inner: Arc<ManagerInner>,
    raw_statements: StatementGroups,
    statements: BoundStatements,
}

impl DatabaseManager {
    /// Create a manager backed by the sqlx driver described by `config`.
    pub fn new(
        schema: impl Into<String>,
        config: &DatabaseConfig,
        statements: StatementGroups,
    ) -> DbResult<Self> {
        let connect_options = SqlxPoolDriver::connect_options(config)?;
        let driver_config = config.clone();
        let factory = move || -> Arc<dyn PoolDriver> {
            Arc::new(SqlxPoolDriver::from_options(
                connect_options.clone(),
                &driver_config,
            ))
        };
        Ok(Self::with_driver(
            schema,
            config.log_queries,
            factory,
            statements,
        ))
    }

    /// Create a manager over a custom driver factory. The factory runs on
    /// first acquire and again whenever the pool is reopened after a close.
    pub fn with_driver(
        schema: impl Into<String>,
        log_queries: bool,
        factory: impl Fn() -> Arc<dyn PoolDriver> + Send + Sync + 'static,
        statements: StatementGroups,
    ) -> Self {
        let schema = schema.into();
        let inner = Arc::new(ManagerInner {
            schema: schema.clone(),
            log_queries,
            pool: ConnectionPool::new(schema.clone(), factory),
            current: Mutex::new(None),
        });

        let provider: ClientProvider = {
            let inner = Arc::clone(&inner);
            Arc::new(move || -> BoxFuture<'static, DbResult<Box<dyn Client>>> {
                let inner = Arc::clone(&inner);
                Box::pin(async move { inner.acquire_client().await })
            })
        };
        let bound = bind_statements(&statements, &schema, ClientBinding::PerCall(provider));

        Self {
            inner,
            raw_statements: statements,
            statements: bound,
        }
    }

    /// Schema this manager serves.
    pub fn schema(&self) -> &str {
        &self.inner.schema
    }

    /// The provider-bound statement groups: each call leases its own client.
    pub fn statements(&self) -> &BoundStatements {
        &self.statements
    }

    /// Look up one bound statement by group and name.
    pub fn statement(&self, group: &str, name: &str) -> Option<BoundStatement> {
        self.statements
            .get(group)
            .and_then(|group| group.get(name))
            .cloned()
    }

    /// Eagerly create the connection pool without leasing anything.
    pub fn connect(&self) {
        let _ = self.inner.pool.driver();
    }

    /// Execute one ad hoc statement: acquire, execute, release.
    pub async fn query_raw(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<Row>> {
        let client = self.inner.acquire_client().await?;
        let result = query::query_raw(client.as_ref(), sql, params).await;
        client.release().await;
        result
    }

    /// Open a transaction: lease a client, pin it, rebind the statement
    /// groups to it, and track the handle as the current transaction. The
    /// tracking slot is cleared when the transaction commits or rolls back.
    pub async fn begin_transact(&self) -> DbResult<Transaction> {
        let client = self.inner.acquire_client().await?;
        let transaction =
            Transaction::begin(client, self.inner.schema.clone(), &self.raw_statements).await?;

        let slot: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        transaction.set_observer(Box::new(move || {
            if let Some(inner) = slot.upgrade() {
                *inner.current.lock().unwrap() = None;
            }
        }));

        let mut current = self.inner.current.lock().unwrap();
        if let Some(open) = current.as_ref() {
            warn!(
                open_transaction = %open.id(),
                new_transaction = %transaction.id(),
                "Replacing tracked transaction while another is open"
            );
        }
        *current = Some(transaction.clone());
        drop(current);

        Ok(transaction)
    }

    /// Run `callback` inside a transaction: commit on success, roll back and
    /// return the original error on failure.
    pub async fn transact<T, F, Fut>(&self, callback: F) -> DbResult<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let transaction = self.begin_transact().await?;
        match callback(transaction.clone()).await {
            Ok(value) => {
                transaction.commit().await?;
                Ok(value)
            }
            Err(error) => {
                transaction.rollback().await?;
                Err(error)
            }
        }
    }

    /// The currently tracked transaction, if one is open.
    pub fn current_transaction(&self) -> Option<Transaction> {
        self.inner.current.lock().unwrap().clone()
    }

    /// Drain and close the connection pool.
    pub async fn close(&self) {
        self.inner.pool.close().await;
    }
}

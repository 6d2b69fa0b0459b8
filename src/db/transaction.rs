//! Transaction state machine.
//!
//! A transaction pins one leased client for its whole lifetime: `BEGIN` runs
//! on it, every bound statement runs on it, and `COMMIT`/`ROLLBACK` end it.
//! The pinned client lives in a take-once slot, so it is released exactly
//! once on every exit path and any use after the terminal transition fails
//! cleanly.

use crate::db::client::Client;
use crate::db::statements::{
    BoundStatement, BoundStatements, ClientBinding, StatementGroups, bind_statements,
};
use crate::db::types::{Row, SqlParam};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::debug;

/// One-shot callback fired after the terminal transition.
pub(crate) type Observer = Box<dyn FnOnce() + Send>;

/// Shared take-once slot over the client pinned to a transaction.
///
/// Statements query through the slot; the terminal transition takes the
/// client out, which makes the release happen at most once and turns any
/// later use into an error.
#[derive(Clone)]
pub struct PinnedClient {
    slot: Arc<Mutex<Option<Box<dyn Client>>>>,
}

impl PinnedClient {
    pub(crate) fn new(client: Box<dyn Client>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(client))),
        }
    }

    /// Execute a statement on the pinned client.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<Row>> {
        let guard = self.slot.lock().await;
        match guard.as_ref() {
            Some(client) => client.query(sql, params).await,
            None => Err(DbError::transaction("Transaction is no longer active")),
        }
    }

    /// Release the pinned client. No-op if it was already taken.
    pub(crate) async fn release(&self) {
        let client = self.slot.lock().await.take();
        if let Some(client) = client {
            client.release().await;
        }
    }
}

#[async_trait]
impl Client for PinnedClient {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<Row>> {
        PinnedClient::query(self, sql, params).await
    }

    async fn release(self: Box<Self>) {
        PinnedClient::release(&self).await
    }
}

struct TransactionInner {
    id: String,
    schema: String,
    client: PinnedClient,
    statements: BoundStatements,
    observer: StdMutex<Option<Observer>>,
}

/// An open transaction: control methods plus the statement surface rebound
/// to the pinned client. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    /// Begin a transaction on an already-leased client.
    ///
    /// If `BEGIN` itself fails the client is released immediately and the
    /// error propagates: the transaction never existed.
    pub(crate) async fn begin(
        client: Box<dyn Client>,
        schema: String,
        statements: &StatementGroups,
    ) -> DbResult<Transaction> {
        if let Err(error) = client.query("BEGIN", &[]).await {
            client.release().await;
            return Err(error);
        }

        let id = generate_transaction_id();
        let pinned = PinnedClient::new(client);
        let statements = bind_statements(statements, &schema, ClientBinding::Pinned(pinned.clone()));
        debug!(transaction_id = %id, schema = %schema, "Transaction started");

        Ok(Transaction {
            inner: Arc::new(TransactionInner {
                id,
                schema,
                client: pinned,
                statements,
                observer: StdMutex::new(None),
            }),
        })
    }

    /// Transaction identifier, for log correlation.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Schema this transaction is bound to.
    pub fn schema(&self) -> &str {
        &self.inner.schema
    }

    /// Marks this statement surface as transactional.
    pub fn is_transact(&self) -> bool {
        true
    }

    /// The statement groups rebound to the pinned client.
    pub fn statements(&self) -> &BoundStatements {
        &self.inner.statements
    }

    /// Look up one bound statement by group and name.
    pub fn statement(&self, group: &str, name: &str) -> Option<BoundStatement> {
        self.inner
            .statements
            .get(group)
            .and_then(|group| group.get(name))
            .cloned()
    }

    /// Execute an ad hoc statement on the pinned client.
    pub async fn query_raw(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<Row>> {
        crate::db::query::query_raw(&self.inner.client, sql, params).await
    }

    /// Register the one-shot terminal callback. Fired exactly once, right
    /// after the commit/rollback statement completes.
    pub(crate) fn set_observer(&self, observer: Observer) {
        *self.inner.observer.lock().unwrap() = Some(observer);
    }

    /// Commit the transaction and release the pinned client.
    pub async fn commit(&self) -> DbResult<()> {
        self.finish("COMMIT").await
    }

    /// Roll the transaction back and release the pinned client.
    pub async fn rollback(&self) -> DbResult<()> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&self, control: &'static str) -> DbResult<()> {
        let result = self.inner.client.query(control, &[]).await;

        // fires once, after the control statement, independent of release ordering
        let observer = self.inner.observer.lock().unwrap().take();
        if let Some(observer) = observer {
            observer();
        }

        self.inner.client.release().await;

        match &result {
            Ok(_) => debug!(transaction_id = %self.inner.id, control, "Transaction finished"),
            Err(error) => debug!(
                transaction_id = %self.inner.id,
                control,
                error = %error,
                "Transaction control statement failed"
            ),
        }
        result.map(|_| ())
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

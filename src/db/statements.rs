//! Statement binding.
//!
//! Raw statements are grouped functions of `(client, schema, args)`. Binding
//! produces a structurally identical map of callables that close over either
//! a client provider (one client acquired and released per call) or a fixed
//! pinned client (transaction mode, where the transaction owns the release).

use crate::db::client::Client;
use crate::db::transaction::PinnedClient;
use crate::db::types::{Row, SqlParam};
use crate::error::DbResult;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// Future returned by a raw statement, borrowing the client for the call.
pub type StatementFuture<'a> = BoxFuture<'a, DbResult<Vec<Row>>>;

/// A raw parameterized statement function.
pub type RawStatement =
    Arc<dyn for<'a> Fn(&'a dyn Client, &'a str, Vec<SqlParam>) -> StatementFuture<'a> + Send + Sync>;

/// Nested statement map: group name to statement name to raw function.
pub type StatementGroups = HashMap<String, HashMap<String, RawStatement>>;

/// A statement bound to a schema and a client source; callers only pass args.
pub type BoundStatement =
    Arc<dyn Fn(Vec<SqlParam>) -> BoxFuture<'static, DbResult<Vec<Row>>> + Send + Sync>;

/// Mirror of [`StatementGroups`] with every leaf bound.
pub type BoundStatements = HashMap<String, HashMap<String, BoundStatement>>;

/// Zero-argument source of freshly leased, decorated clients.
pub type ClientProvider = Arc<dyn Fn() -> BoxFuture<'static, DbResult<Box<dyn Client>>> + Send + Sync>;

/// What bound statements close over.
#[derive(Clone)]
pub enum ClientBinding {
    /// Acquire a client per call and release it before returning.
    PerCall(ClientProvider),
    /// Run every call on one pinned client; the owner releases it.
    Pinned(PinnedClient),
}

/// Package a closure as a [`RawStatement`].
pub fn raw_statement<F>(statement: F) -> RawStatement
where
    F: for<'a> Fn(&'a dyn Client, &'a str, Vec<SqlParam>) -> StatementFuture<'a>
        + Send
        + Sync
        + 'static,
{
    Arc::new(statement)
}

/// Bind every statement in `groups` to `schema` and the given client source.
/// The output map mirrors the input structure exactly.
pub fn bind_statements(
    groups: &StatementGroups,
    schema: &str,
    binding: ClientBinding,
) -> BoundStatements {
    groups
        .iter()
        .map(|(group, statements)| {
            let bound = statements
                .iter()
                .map(|(name, statement)| {
                    let statement = Arc::clone(statement);
                    let bound = match &binding {
                        ClientBinding::PerCall(provider) => {
                            bind_per_call(statement, schema.to_string(), Arc::clone(provider))
                        }
                        ClientBinding::Pinned(client) => {
                            bind_pinned(statement, schema.to_string(), client.clone())
                        }
                    };
                    (name.clone(), bound)
                })
                .collect();
            (group.clone(), bound)
        })
        .collect()
}

/// One client per call: acquire via the provider, run the statement, release
/// on every path before returning.
fn bind_per_call(
    statement: RawStatement,
    schema: String,
    provider: ClientProvider,
) -> BoundStatement {
    Arc::new(
        move |args: Vec<SqlParam>| -> BoxFuture<'static, DbResult<Vec<Row>>> {
            let statement = Arc::clone(&statement);
            let schema = schema.clone();
            let provider = Arc::clone(&provider);
            Box::pin(async move {
                let client = (*provider)().await?;
                let result = (*statement)(client.as_ref(), &schema, args).await;
                client.release().await;
                result
            })
        },
    )
}

/// Pinned mode: run on the fixed client, never release it here.
fn bind_pinned(statement: RawStatement, schema: String, client: PinnedClient) -> BoundStatement {
    Arc::new(
        move |args: Vec<SqlParam>| -> BoxFuture<'static, DbResult<Vec<Row>>> {
            let statement = Arc::clone(&statement);
            let schema = schema.clone();
            let client = client.clone();
            Box::pin(async move { (*statement)(&client, &schema, args).await })
        },
    )
}

//! Database access layer.
//!
//! Control flow for a plain statement: facade → bound statement → pool
//! acquire → capability chain over the leased connection → raw execution →
//! release. Transactions pin one leased client and rebind the statement
//! groups to it until commit or rollback.

pub mod client;
pub mod driver;
#[macro_use]
pub mod macros;
pub mod manager;
pub mod pool;
pub mod query;
pub mod statements;
pub mod transaction;
pub mod types;

pub use client::{
    Client, LeasedClient, LoggedClient, ProfiledClient, RetryClient, decorate_client,
    render_statement,
};
pub use driver::{PoolDriver, PooledConnection, SqlxPoolDriver};
pub use manager::DatabaseManager;
pub use pool::{ConnectionPool, PoolState};
pub use query::{query_raw, try_insert_unique};
pub use statements::{
    BoundStatement, BoundStatements, ClientBinding, ClientProvider, RawStatement, StatementGroups,
    bind_statements, raw_statement,
};
pub use transaction::{PinnedClient, Transaction};
pub use types::{Row, RowToJson, SqlParam};

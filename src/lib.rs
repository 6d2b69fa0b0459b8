//! pglease
//!
//! A pooled PostgreSQL access layer sitting between application statement
//! groups and the native driver: connection leasing with a graceful
//! drain-then-close protocol, a capability chain over leased clients
//! (deadlock retry, profiling, statement logging), an explicit transaction
//! protocol with guaranteed single release, and schema-bound statement maps.

pub mod config;
pub mod db;
pub mod error;
pub mod retry;

pub use config::{DatabaseConfig, PoolSettings, TlsMode};
pub use db::{Client, DatabaseManager, Row, SqlParam, Transaction};
pub use error::{DbError, DbResult};
pub use retry::{RetryPolicy, retry_until};

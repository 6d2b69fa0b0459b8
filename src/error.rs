//! Error types for the access layer.
//!
//! This module defines all error types using `thiserror`. The server SQLSTATE
//! is preserved on database failures because the retry machinery dispatches on
//! it (deadlocks, pool exhaustion, unique violations).

use thiserror::Error;

/// PostgreSQL SQLSTATE codes consumed by the access layer.
pub mod sqlstate {
    /// Deadlock detected; the statement is retried a bounded number of times.
    pub const DEADLOCK_DETECTED: &str = "40P01";
    /// Too many clients already; acquisition is retried a bounded number of times.
    pub const TOO_MANY_CONNECTIONS: &str = "53300";
    /// Unique constraint violation; consumed by `try_insert_unique`.
    pub const UNIQUE_VIOLATION: &str = "23505";
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Acquisition failed: {message}")]
    Acquire { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "40P01" for deadlock detected
        sql_state: Option<String>,
    },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an acquisition error.
    pub fn acquire(message: impl Into<String>) -> Self {
        Self::Acquire {
            message: message.into(),
        }
    }

    /// Create a database error with optional SQLSTATE.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the server SQLSTATE for this error, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is a deadlock (SQLSTATE 40P01).
    pub fn is_deadlock(&self) -> bool {
        self.sql_state() == Some(sqlstate::DEADLOCK_DETECTED)
    }

    /// Check if this error is connection exhaustion (SQLSTATE 53300).
    pub fn is_too_many_connections(&self) -> bool {
        self.sql_state() == Some(sqlstate::TOO_MANY_CONNECTIONS)
    }

    /// Check if this error is a unique constraint violation (SQLSTATE 23505).
    pub fn is_unique_violation(&self) -> bool {
        self.sql_state() == Some(sqlstate::UNIQUE_VIOLATION)
    }

    /// Check if this error is in the transient-retriable category.
    pub fn is_transient(&self) -> bool {
        self.is_deadlock() || self.is_too_many_connections()
    }
}

/// Convert sqlx errors to DbError, preserving the server SQLSTATE.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::acquire(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::database("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => DbError::acquire("Connection pool is closed"),
            sqlx::Error::Io(io_err) => DbError::acquire(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DbError::acquire(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => DbError::acquire(format!("Protocol error: {}", msg)),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

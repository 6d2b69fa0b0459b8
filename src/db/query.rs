//! Ad hoc query helpers.

use crate::db::client::{Client, render_statement};
use crate::db::types::{Row, SqlParam};
use crate::error::DbResult;
use tracing::debug;

/// Execute an ad hoc statement on an already-held client.
///
/// On failure the statement is rendered with its parameters and logged at
/// debug level before the error propagates.
pub async fn query_raw(client: &dyn Client, sql: &str, params: &[SqlParam]) -> DbResult<Vec<Row>> {
    match client.query(sql, params).await {
        Ok(rows) => Ok(rows),
        Err(error) => {
            debug!(statement = %render_statement(sql, params), "Statement failed");
            Err(error)
        }
    }
}

/// Run an insert until it stops failing with a unique-constraint violation
/// (SQLSTATE 23505), returning the first row. Any other error propagates.
///
/// Meant for statements that generate a fresh candidate key on each
/// evaluation, where a collision just means "draw again".
pub async fn try_insert_unique(
    client: &dyn Client,
    sql: &str,
    params: &[SqlParam],
) -> DbResult<Option<Row>> {
    loop {
        match client.query(sql, params).await {
            Ok(rows) => return Ok(rows.into_iter().next()),
            Err(error) if error.is_unique_violation() => continue,
            Err(error) => return Err(error),
        }
    }
}

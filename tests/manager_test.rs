//! Integration tests for the database facade over a scripted driver.

mod support;

use pglease::db::{DatabaseManager, PoolDriver, StatementGroups};
use pglease::{DbError, SqlParam, statement};
use std::collections::HashMap;
use std::sync::Arc;
use support::{ScriptedDriver, deadlock, exhaustion};

const FIND_SQL: &str = "SELECT id FROM users WHERE id = $1";

fn user_statements() -> StatementGroups {
    let find = statement!(|client, _schema, args| {
        client.query(FIND_SQL, &args).await
    });
    let mut users = HashMap::new();
    users.insert("find".to_string(), find);
    let mut groups = StatementGroups::new();
    groups.insert("users".to_string(), users);
    groups
}

fn manager_over(driver: &Arc<ScriptedDriver>, statements: StatementGroups) -> DatabaseManager {
    support::init_tracing();
    let shared = Arc::clone(driver);
    DatabaseManager::with_driver(
        "app",
        false,
        move || Arc::clone(&shared) as Arc<dyn PoolDriver>,
        statements,
    )
}

#[tokio::test]
async fn test_bound_statement_acquires_executes_releases() {
    let driver = ScriptedDriver::new();
    let row = serde_json::json!({"id": 7}).as_object().cloned().unwrap();
    driver.script.result(FIND_SQL, vec![row]);
    let manager = manager_over(&driver, user_statements());

    let find = manager.statement("users", "find").unwrap();
    let rows = (*find)(vec![SqlParam::from(7i64)]).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], 7);
    assert_eq!(driver.script.count(FIND_SQL), 1);
    assert_eq!(driver.connect_count(), 1);
    assert_eq!(driver.release_count(), 1);
}

#[tokio::test]
async fn test_bound_statement_releases_on_failure() {
    let driver = ScriptedDriver::new();
    driver
        .script
        .fail(FIND_SQL, DbError::database("syntax error", None));
    let manager = manager_over(&driver, user_statements());

    let find = manager.statement("users", "find").unwrap();
    assert!((*find)(vec![SqlParam::from(7i64)]).await.is_err());
    assert_eq!(driver.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_query_raw_retries_deadlocks_until_success() {
    let driver = ScriptedDriver::new();
    for _ in 0..3 {
        driver.script.fail("SELECT 1", deadlock());
    }
    let manager = manager_over(&driver, StatementGroups::new());

    manager.query_raw("SELECT 1", &[]).await.unwrap();

    // three deadlocks then success, on a single leased client
    assert_eq!(driver.script.count("SELECT 1"), 4);
    assert_eq!(driver.connect_count(), 1);
    assert_eq!(driver.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_query_raw_surfaces_deadlock_after_retries_exhausted() {
    let driver = ScriptedDriver::new();
    for _ in 0..5 {
        driver.script.fail("SELECT 1", deadlock());
    }
    let manager = manager_over(&driver, StatementGroups::new());

    let error = manager.query_raw("SELECT 1", &[]).await.unwrap_err();
    assert!(error.is_deadlock());
    assert_eq!(driver.script.count("SELECT 1"), 4);
    // the lease is still returned on the failure path
    assert_eq!(driver.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_acquisition_retries_exhaustion_then_succeeds() {
    let driver = ScriptedDriver::new();
    driver.fail_connect(exhaustion());
    driver.fail_connect(exhaustion());
    let manager = manager_over(&driver, StatementGroups::new());

    manager.query_raw("SELECT 1", &[]).await.unwrap();
    assert_eq!(driver.connect_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_acquisition_non_exhaustion_error_not_retried() {
    let driver = ScriptedDriver::new();
    driver.fail_connect(DbError::acquire("connection refused"));
    let manager = manager_over(&driver, StatementGroups::new());

    assert!(manager.query_raw("SELECT 1", &[]).await.is_err());
    assert_eq!(driver.connect_count(), 1);
}

#[tokio::test]
async fn test_transact_commits_on_success() {
    let driver = ScriptedDriver::new();
    let manager = manager_over(&driver, user_statements());

    let value = manager
        .transact(|tx| async move {
            let find = tx.statement("users", "find").unwrap();
            (*find)(vec![SqlParam::from(1i64)]).await?;
            Ok(42)
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    let executed = driver.script.executed();
    assert_eq!(executed, ["BEGIN", FIND_SQL, "COMMIT"]);
    assert_eq!(driver.script.count("ROLLBACK"), 0);
    assert_eq!(driver.release_count(), 1);
    assert!(manager.current_transaction().is_none());
}

#[tokio::test]
async fn test_transact_rolls_back_and_rethrows_on_callback_error() {
    let driver = ScriptedDriver::new();
    let manager = manager_over(&driver, user_statements());

    let result: Result<(), DbError> = manager
        .transact(|_tx| async move { Err(DbError::internal("application failure")) })
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, DbError::Internal { .. }));
    assert_eq!(driver.script.count("ROLLBACK"), 1);
    assert_eq!(driver.script.count("COMMIT"), 0);
    assert_eq!(driver.release_count(), 1);
    assert!(manager.current_transaction().is_none());
}

#[tokio::test]
async fn test_failed_begin_releases_client_and_tracks_nothing() {
    let driver = ScriptedDriver::new();
    driver
        .script
        .fail("BEGIN", DbError::database("cannot BEGIN", None));
    let manager = manager_over(&driver, user_statements());

    assert!(manager.begin_transact().await.is_err());
    assert_eq!(driver.release_count(), 1);
    assert!(manager.current_transaction().is_none());
}

#[tokio::test]
async fn test_transaction_pins_one_client_for_all_statements() {
    let driver = ScriptedDriver::new();
    let manager = manager_over(&driver, user_statements());

    let tx = manager.begin_transact().await.unwrap();
    let find = tx.statement("users", "find").unwrap();
    (*find)(vec![SqlParam::from(1i64)]).await.unwrap();
    (*find)(vec![SqlParam::from(2i64)]).await.unwrap();
    tx.query_raw("SELECT 2", &[]).await.unwrap();

    // everything ran on the single pinned lease, still unreleased
    assert_eq!(driver.connect_count(), 1);
    assert_eq!(driver.release_count(), 0);

    tx.commit().await.unwrap();
    assert_eq!(driver.release_count(), 1);
}

#[tokio::test]
async fn test_begin_transact_tracks_current_until_terminal() {
    let driver = ScriptedDriver::new();
    let manager = manager_over(&driver, StatementGroups::new());

    let tx = manager.begin_transact().await.unwrap();
    let current = manager.current_transaction().unwrap();
    assert_eq!(current.id(), tx.id());
    assert!(current.is_transact());
    assert_eq!(current.schema(), "app");

    tx.rollback().await.unwrap();
    assert!(manager.current_transaction().is_none());
}

#[tokio::test]
async fn test_second_begin_replaces_tracked_reference() {
    let driver = ScriptedDriver::new();
    let manager = manager_over(&driver, StatementGroups::new());

    let first = manager.begin_transact().await.unwrap();
    let second = manager.begin_transact().await.unwrap();

    // the slot tracks the newest transaction; the first stays usable
    assert_eq!(manager.current_transaction().unwrap().id(), second.id());
    first.commit().await.unwrap();
    second.commit().await.unwrap();
    assert_eq!(driver.release_count(), 2);
}

#[tokio::test]
async fn test_close_twice_is_idempotent() {
    let driver = ScriptedDriver::new();
    let manager = manager_over(&driver, StatementGroups::new());

    manager.query_raw("SELECT 1", &[]).await.unwrap();
    manager.close().await;
    assert!(driver.ended.load(std::sync::atomic::Ordering::SeqCst));

    driver
        .ended
        .store(false, std::sync::atomic::Ordering::SeqCst);
    manager.close().await;
    assert!(!driver.ended.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn test_manager_reopens_pool_after_close() {
    let driver = ScriptedDriver::new();
    let manager = manager_over(&driver, StatementGroups::new());

    manager.query_raw("SELECT 1", &[]).await.unwrap();
    manager.close().await;

    manager.query_raw("SELECT 1", &[]).await.unwrap();
    assert_eq!(driver.connect_count(), 2);
}

#[tokio::test]
async fn test_query_logging_renders_statements() {
    let driver = ScriptedDriver::new();
    support::init_tracing();
    let shared = Arc::clone(&driver);
    let manager = DatabaseManager::with_driver(
        "app",
        true, // log_queries on: the logging layer replaces the profiler
        move || Arc::clone(&shared) as Arc<dyn PoolDriver>,
        StatementGroups::new(),
    );

    manager
        .query_raw("SELECT $1, $2", &[SqlParam::from("x"), SqlParam::from(5i64)])
        .await
        .unwrap();
    assert_eq!(driver.script.count("SELECT $1, $2"), 1);
}

//! Integration tests for the store boundary
//!
//! These run against real SQLite databases through the sqlx backend. Tests
//! that need two connections to the same database use a temporary file.
//! PostgreSQL tests are marked `#[ignore]`:
//!
//! ```bash
//! PGHOST=localhost PGUSER=repair PGDATABASE=cms \
//! cargo test -p dbmend-store --features postgres --test integration_tests -- --ignored
//! ```

use dbmend_store::{
    ConnectionProvider, ForcedCommit, Ident, RecordingStore, Session, SqliteProvider, SqliteStore,
    Store, StoreError, TransactionScope, Value,
};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Helper Functions
// =============================================================================

async fn memory_session(setup: &str) -> Session {
    let store = SqliteStore::in_memory().await.unwrap();
    store.execute_batch(setup).await.unwrap();
    Session::new(Box::new(store), TIMEOUT)
}

async fn count(session: &Session, table: &str) -> i64 {
    let b = session.builder();
    let mut stmt = b.statement();
    stmt.push_sql("SELECT COUNT(*) FROM ")
        .push_sql(&b.table(&Ident::new(table).unwrap()));
    session.query_int(&stmt).await.unwrap()
}

async fn insert_node(session: &Session, id: i64, name: &str) {
    let mut stmt = session.builder().statement();
    stmt.push_sql("INSERT INTO nodes (id, name) VALUES (")
        .push_param(id)
        .push_sql(", ")
        .push_param(name)
        .push_sql(")");
    assert_eq!(session.execute(&stmt).await.unwrap(), 1);
}

const NODES: &str = "CREATE TABLE nodes (id INTEGER PRIMARY KEY, name TEXT);";

// =============================================================================
// Query / Execute
// =============================================================================

#[tokio::test]
async fn test_query_decodes_values() {
    let session = memory_session(NODES).await;
    insert_node(&session, 1, "root").await;

    let mut stmt = session.builder().statement();
    stmt.push_sql("SELECT id, name, NULL FROM nodes WHERE id = ").push_param(1i64);
    let rows = session.query(&stmt).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].values(),
        &[Value::Int(1), Value::Text("root".into()), Value::Null]
    );
}

#[tokio::test]
async fn test_update_returning() {
    let session = memory_session(
        "CREATE TABLE id_counters (counter_key TEXT PRIMARY KEY, counter_value INTEGER NOT NULL);
         INSERT INTO id_counters VALUES ('node', 100);",
    )
    .await;

    let mut stmt = session.builder().statement();
    stmt.push_sql("UPDATE id_counters SET counter_value = counter_value + ")
        .push_param(20i64)
        .push_sql(" WHERE counter_key = ")
        .push_param("node")
        .push_sql(" RETURNING counter_value");
    assert_eq!(session.query_int(&stmt).await.unwrap(), 120);
}

#[tokio::test]
async fn test_query_error_is_reported() {
    let session = memory_session(NODES).await;
    let mut stmt = session.builder().statement();
    stmt.push_sql("SELECT * FROM missing_table");
    assert!(matches!(session.query(&stmt).await, Err(StoreError::Query(_))));
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn test_transaction_scope_rollback() {
    let session = memory_session(NODES).await;

    let scope = TransactionScope::begin(&session).await.unwrap();
    assert!(scope.is_owned());
    insert_node(&session, 1, "a").await;
    insert_node(&session, 2, "b").await;
    scope.rollback().await.unwrap();

    assert_eq!(count(&session, "nodes").await, 0);
    assert!(session.auto_commit().await);
}

#[tokio::test]
async fn test_transaction_scope_commit() {
    let session = memory_session(NODES).await;

    let scope = TransactionScope::begin(&session).await.unwrap();
    insert_node(&session, 1, "a").await;
    scope.commit().await.unwrap();

    session.rollback().await.unwrap();
    assert_eq!(count(&session, "nodes").await, 1);
}

#[tokio::test]
async fn test_nested_scope_joins_caller_transaction() {
    let session = memory_session(NODES).await;
    session.set_auto_commit(false).await.unwrap();

    let scope = TransactionScope::begin(&session).await.unwrap();
    assert!(!scope.is_owned());
    insert_node(&session, 1, "a").await;
    scope.commit().await.unwrap();

    // The caller still owns the boundary
    session.rollback().await.unwrap();
    assert_eq!(count(&session, "nodes").await, 0);
    assert!(!session.auto_commit().await);
}

#[tokio::test]
async fn test_forced_commit_is_visible_to_other_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repair.db");

    let writer = SqliteStore::open_path(&path).await.unwrap();
    writer.execute_batch(NODES).await.unwrap();
    let writer = Session::new(Box::new(writer), TIMEOUT);
    let reader = Session::new(Box::new(SqliteStore::open_path(&path).await.unwrap()), TIMEOUT);

    writer.set_auto_commit(false).await.unwrap();
    insert_node(&writer, 1, "pending").await;
    assert_eq!(count(&reader, "nodes").await, 0);

    let forced = ForcedCommit::enter(&writer).await.unwrap();
    insert_node(forced.session(), 2, "immediate").await;
    assert_eq!(count(&reader, "nodes").await, 2);
    forced.restore().await.unwrap();

    assert!(!writer.auto_commit().await);
}

// =============================================================================
// Timeouts and the recording decorator
// =============================================================================

#[tokio::test]
async fn test_statement_timeout() {
    let inner = SqliteStore::in_memory().await.unwrap();
    let store = RecordingStore::new(Box::new(inner)).with_latency(Duration::from_millis(200));
    let session = Session::new(Box::new(store), Duration::from_millis(20));

    let mut stmt = session.builder().statement();
    stmt.push_sql("SELECT 1");
    assert!(matches!(session.query(&stmt).await, Err(StoreError::Timeout(_))));
}

#[tokio::test]
async fn test_recording_store_injects_failures() {
    let inner = SqliteStore::in_memory().await.unwrap();
    inner.execute_batch(NODES).await.unwrap();
    let store = RecordingStore::new(Box::new(inner)).fail_on("DELETE");
    let log = store.log_handle();

    assert!(store.query("SELECT * FROM nodes", &[]).await.is_ok());
    assert!(store.execute("DELETE FROM nodes", &[]).await.is_err());
    store.commit().await.unwrap();

    let entries = log.lock().unwrap().clone();
    assert_eq!(
        entries,
        vec![
            "SELECT * FROM nodes".to_string(),
            "FAILED DELETE FROM nodes".to_string(),
            "COMMIT".to_string(),
        ]
    );
}

// =============================================================================
// Providers
// =============================================================================

#[tokio::test]
async fn test_sqlite_provider_opens_independent_connections() {
    let dir = tempfile::tempdir().unwrap();
    let provider = SqliteProvider::from_path(&dir.path().join("p.db")).with_schema(Some("main".into()));

    let first = provider.connect().await.unwrap();
    first.execute(NODES, &[]).await.unwrap();
    first.execute("INSERT INTO nodes (id, name) VALUES (1, 'x')", &[]).await.unwrap();

    let second = Session::new(provider.connect().await.unwrap(), TIMEOUT);
    assert_eq!(second.metadata().schema.as_deref(), Some("main"));
    assert_eq!(count(&second, "nodes").await, 1);
    assert!(second.ping().await.is_ok());
    assert!(provider.describe().starts_with("sqlite "));
}

#[tokio::test]
#[ignore]
#[cfg(feature = "postgres")]
async fn test_postgres_ping() {
    use dbmend_store::PostgresProvider;

    let conn = format!(
        "host={} user={} dbname={}",
        std::env::var("PGHOST").unwrap_or_else(|_| "localhost".into()),
        std::env::var("PGUSER").unwrap_or_else(|_| "postgres".into()),
        std::env::var("PGDATABASE").unwrap_or_else(|_| "postgres".into()),
    );
    let provider = PostgresProvider::new(conn);
    let session = Session::new(provider.connect().await.unwrap(), TIMEOUT);
    session.ping().await.unwrap();
}

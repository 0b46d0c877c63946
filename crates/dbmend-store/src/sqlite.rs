//! SQLite store backed by sqlx
//!
//! Each `SqliteStore` owns exactly one connection. Transactions are driven
//! with plain `BEGIN`/`COMMIT`/`ROLLBACK` statements so the auto-commit mode
//! can be switched at any point, independent of sqlx's transaction guard.

use crate::store::{ConnectionProvider, DriverFamily, Store, StoreError, StoreMetadata, TxState};
use crate::value::{Row, Value};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row as _, Sqlite, SqliteConnection, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

/// How long SQLite waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    conn: SqliteConnection,
    tx: TxState,
}

/// A single SQLite connection
pub struct SqliteStore {
    inner: Mutex<Inner>,
    metadata: StoreMetadata,
}

impl SqliteStore {
    /// Connect with explicit options
    pub async fn connect_with(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let conn = options
            .connect()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                tx: TxState::default(),
            }),
            metadata: StoreMetadata::new(DriverFamily::Sqlite),
        })
    }

    /// Connect to a `sqlite:` URL, creating the file if missing
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with(parse_url(url)?).await
    }

    /// Open (or create) a database file
    pub async fn open_path(path: &Path) -> Result<Self, StoreError> {
        Self::connect_with(file_options(path)).await
    }

    /// Private in-memory database, gone when the store is dropped
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    pub fn with_metadata(mut self, metadata: StoreMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Execute a batch of statements without parameters
    ///
    /// Convenience for schema setup and fixtures.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        sqlx::raw_sql(sql)
            .execute(&mut inner.conn)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    pub async fn close(self) -> Result<(), StoreError> {
        let inner = self.inner.into_inner();
        inner
            .conn
            .close()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

fn parse_url(url: &str) -> Result<SqliteConnectOptions, StoreError> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| StoreError::Config(format!("invalid sqlite url {}: {}", url, e)))?;
    Ok(options
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal))
}

fn file_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal)
}

fn query_error(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<i64>),
            Value::Int(v) => query.bind(*v),
            Value::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> Result<Row, StoreError> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let raw = row.try_get_raw(idx).map_err(query_error)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_string();
        let value = match type_name.as_str() {
            "INTEGER" | "BOOLEAN" => Value::Int(row.try_get::<i64, _>(idx).map_err(query_error)?),
            "REAL" => Value::Text(row.try_get::<f64, _>(idx).map_err(query_error)?.to_string()),
            "BLOB" => {
                let bytes = row.try_get::<Vec<u8>, _>(idx).map_err(query_error)?;
                Value::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => Value::Text(row.try_get::<String, _>(idx).map_err(query_error)?),
        };
        values.push(value);
    }
    Ok(Row::new(values))
}

async fn begin_if_needed(inner: &mut Inner) -> Result<(), StoreError> {
    if inner.tx.needs_begin() {
        sqlx::query("BEGIN")
            .execute(&mut inner.conn)
            .await
            .map_err(query_error)?;
        inner.tx.open = true;
    }
    Ok(())
}

async fn finish(inner: &mut Inner, statement: &'static str) -> Result<(), StoreError> {
    if inner.tx.open {
        sqlx::query(statement)
            .execute(&mut inner.conn)
            .await
            .map_err(query_error)?;
        inner.tx.open = false;
    }
    Ok(())
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        let mut inner = self.inner.lock().await;
        begin_if_needed(&mut inner).await?;

        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut inner.conn)
            .await
            .map_err(query_error)?;

        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        begin_if_needed(&mut inner).await?;

        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut inner.conn)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected())
    }

    async fn auto_commit(&self) -> bool {
        self.inner.lock().await.tx.auto_commit
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if enabled {
            finish(&mut inner, "COMMIT").await?;
        }
        inner.tx.auto_commit = enabled;
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        finish(&mut inner, "COMMIT").await
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        finish(&mut inner, "ROLLBACK").await
    }
}

/// Opens one `SqliteStore` per request
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    options: SqliteConnectOptions,
    target: String,
    schema: Option<String>,
    catalog: Option<String>,
}

impl SqliteProvider {
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            options: parse_url(url)?,
            target: url.to_string(),
            schema: None,
            catalog: None,
        })
    }

    pub fn from_path(path: &Path) -> Self {
        Self {
            options: file_options(path),
            target: path.display().to_string(),
            schema: None,
            catalog: None,
        }
    }

    pub fn with_schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_catalog(mut self, catalog: Option<String>) -> Self {
        self.catalog = catalog;
        self
    }
}

#[async_trait::async_trait]
impl ConnectionProvider for SqliteProvider {
    fn describe(&self) -> String {
        format!("sqlite {}", self.target)
    }

    async fn connect(&self) -> Result<Box<dyn Store>, StoreError> {
        let store = SqliteStore::connect_with(self.options.clone()).await?;
        let metadata = StoreMetadata::new(DriverFamily::Sqlite)
            .with_schema(self.schema.clone())
            .with_catalog(self.catalog.clone());
        Ok(Box::new(store.with_metadata(metadata)))
    }
}

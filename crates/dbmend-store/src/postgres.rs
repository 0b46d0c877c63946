//! PostgreSQL store using tokio-postgres
//!
//! ## Authentication
//!
//! Connections are opened from a standard PostgreSQL connection string:
//! `host=localhost port=5432 dbname=cms user=repair password=secret`.
//! When the string carries `sslmode=require` the connection is made over
//! TLS via native-tls.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let provider = PostgresProvider::new("host=localhost dbname=cms user=repair")
//!     .with_schema(Some("public".to_string()));
//! let store = provider.connect().await?;
//! ```

use crate::store::{ConnectionProvider, DriverFamily, Store, StoreError, StoreMetadata};
#[cfg(feature = "postgres")]
use crate::store::TxState;
use crate::value::{Row, Value};

#[cfg(feature = "postgres")]
use tokio_postgres::{types::{ToSql, Type}, Client, Config as PgConfig, NoTls};

#[cfg(feature = "postgres")]
use postgres_native_tls::MakeTlsConnector;

#[cfg(feature = "postgres")]
use native_tls::TlsConnector;

/// A single PostgreSQL connection
pub struct PostgresStore {
    #[cfg(feature = "postgres")]
    client: Client,

    #[cfg(feature = "postgres")]
    tx: tokio::sync::Mutex<TxState>,

    metadata: StoreMetadata,
}

impl PostgresStore {
    /// Connect from a connection string, using TLS when `sslmode=require`
    #[cfg(feature = "postgres")]
    pub async fn connect(conn_str: &str, metadata: StoreMetadata) -> Result<Self, StoreError> {
        let config: PgConfig = conn_str
            .parse()
            .map_err(|e| StoreError::Config(format!("Invalid connection string: {}", e)))?;

        let host = config
            .get_hosts()
            .first()
            .map(|h| format!("{:?}", h))
            .unwrap_or_else(|| "localhost".to_string());

        let client = if config.get_ssl_mode() == tokio_postgres::config::SslMode::Require {
            let connector = TlsConnector::builder()
                .build()
                .map_err(|e| StoreError::Config(format!("Failed to create TLS connector: {}", e)))?;
            let (client, connection) = config
                .connect(MakeTlsConnector::new(connector))
                .await
                .map_err(|e| StoreError::Connection(format!("{}: {}", host, e)))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(host = %host, "PostgreSQL TLS connection error: {}", e);
                }
            });
            client
        } else {
            let (client, connection) = config
                .connect(NoTls)
                .await
                .map_err(|e| StoreError::Connection(format!("{}: {}", host, e)))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(host = %host, "PostgreSQL connection error: {}", e);
                }
            });
            client
        };

        Ok(Self {
            client,
            tx: tokio::sync::Mutex::new(TxState::default()),
            metadata,
        })
    }

    /// Connect without postgres feature (returns error)
    #[cfg(not(feature = "postgres"))]
    pub async fn connect(_conn_str: &str, _metadata: StoreMetadata) -> Result<Self, StoreError> {
        Err(StoreError::Unsupported(
            "PostgreSQL support not compiled. Rebuild with: cargo build --features postgres".to_string(),
        ))
    }

    #[cfg(feature = "postgres")]
    async fn begin_if_needed(&self, tx: &mut TxState) -> Result<(), StoreError> {
        if tx.needs_begin() {
            self.client.batch_execute("BEGIN").await.map_err(query_error)?;
            tx.open = true;
        }
        Ok(())
    }

    #[cfg(feature = "postgres")]
    async fn finish(&self, tx: &mut TxState, statement: &str) -> Result<(), StoreError> {
        if tx.open {
            self.client.batch_execute(statement).await.map_err(query_error)?;
            tx.open = false;
        }
        Ok(())
    }

    #[cfg(feature = "postgres")]
    async fn prepared(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<(tokio_postgres::Statement, Vec<Box<dyn ToSql + Sync + Send>>), StoreError> {
        let statement = self.client.prepare(sql).await.map_err(query_error)?;
        let bound = params
            .iter()
            .zip(statement.params())
            .map(|(value, ty)| to_sql_param(value, ty))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((statement, bound))
    }
}

#[cfg(feature = "postgres")]
fn query_error(e: tokio_postgres::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

/// Convert a value to the parameter type the server inferred
///
/// Integers that do not fit the column type, and text that is not a number
/// bound to an integer column, are rejected rather than altered.
#[cfg(feature = "postgres")]
fn to_sql_param(value: &Value, ty: &Type) -> Result<Box<dyn ToSql + Sync + Send>, StoreError> {
    match *ty {
        Type::INT2 => Ok(Box::new(int_param(value, ty, i16::try_from)?)),
        Type::INT4 => Ok(Box::new(int_param(value, ty, i32::try_from)?)),
        Type::INT8 => Ok(Box::new(int_param(value, ty, Ok::<i64, std::convert::Infallible>)?)),
        _ => Ok(Box::new(match value {
            Value::Null => None,
            other => Some(other.to_string()),
        })),
    }
}

#[cfg(feature = "postgres")]
fn int_param<T, E>(value: &Value, ty: &Type, convert: impl Fn(i64) -> Result<T, E>) -> Result<Option<T>, StoreError> {
    if value.is_null() {
        return Ok(None);
    }
    let wide = value
        .as_i64()
        .ok_or_else(|| StoreError::Decode(format!("{:?} is not a valid {} parameter", value, ty)))?;
    convert(wide)
        .map(Some)
        .map_err(|_| StoreError::Decode(format!("{} is out of range for a {} parameter", wide, ty)))
}

#[cfg(feature = "postgres")]
fn decode_row(row: &tokio_postgres::Row) -> Result<Row, StoreError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::INT2 => row.try_get::<_, Option<i16>>(idx).map(|v| Value::from(v.map(i64::from))),
            Type::INT4 => row.try_get::<_, Option<i32>>(idx).map(|v| Value::from(v.map(i64::from))),
            Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(Value::from),
            Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(|v| Value::from(v.map(i64::from))),
            _ => row.try_get::<_, Option<String>>(idx).map(Value::from),
        }
        .map_err(|e| StoreError::Decode(format!("column {}: {}", column.name(), e)))?;
        values.push(value);
    }
    Ok(Row::new(values))
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    #[cfg(feature = "postgres")]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        let mut tx = self.tx.lock().await;
        self.begin_if_needed(&mut tx).await?;

        let (statement, bound) = self.prepared(sql, params).await?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        let rows = self.client.query(&statement, &refs).await.map_err(query_error)?;
        rows.iter().map(decode_row).collect()
    }

    #[cfg(feature = "postgres")]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        let mut tx = self.tx.lock().await;
        self.begin_if_needed(&mut tx).await?;

        let (statement, bound) = self.prepared(sql, params).await?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        self.client.execute(&statement, &refs).await.map_err(query_error)
    }

    #[cfg(feature = "postgres")]
    async fn auto_commit(&self) -> bool {
        self.tx.lock().await.auto_commit
    }

    #[cfg(feature = "postgres")]
    async fn set_auto_commit(&self, enabled: bool) -> Result<(), StoreError> {
        let mut tx = self.tx.lock().await;
        if enabled {
            self.finish(&mut tx, "COMMIT").await?;
        }
        tx.auto_commit = enabled;
        Ok(())
    }

    #[cfg(feature = "postgres")]
    async fn commit(&self) -> Result<(), StoreError> {
        let mut tx = self.tx.lock().await;
        self.finish(&mut tx, "COMMIT").await
    }

    #[cfg(feature = "postgres")]
    async fn rollback(&self) -> Result<(), StoreError> {
        let mut tx = self.tx.lock().await;
        self.finish(&mut tx, "ROLLBACK").await
    }

    #[cfg(not(feature = "postgres"))]
    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>, StoreError> {
        Err(disabled())
    }

    #[cfg(not(feature = "postgres"))]
    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64, StoreError> {
        Err(disabled())
    }

    #[cfg(not(feature = "postgres"))]
    async fn auto_commit(&self) -> bool {
        true
    }

    #[cfg(not(feature = "postgres"))]
    async fn set_auto_commit(&self, _enabled: bool) -> Result<(), StoreError> {
        Err(disabled())
    }

    #[cfg(not(feature = "postgres"))]
    async fn commit(&self) -> Result<(), StoreError> {
        Err(disabled())
    }

    #[cfg(not(feature = "postgres"))]
    async fn rollback(&self) -> Result<(), StoreError> {
        Err(disabled())
    }
}

#[cfg(not(feature = "postgres"))]
fn disabled() -> StoreError {
    StoreError::Unsupported(
        "PostgreSQL support not compiled. Rebuild with: cargo build --features postgres".to_string(),
    )
}

/// Opens one `PostgresStore` per request
#[derive(Debug, Clone)]
pub struct PostgresProvider {
    conn_str: String,
    schema: Option<String>,
    catalog: Option<String>,
}

impl PostgresProvider {
    pub fn new(conn_str: impl Into<String>) -> Self {
        Self {
            conn_str: conn_str.into(),
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
impl ConnectionProvider for PostgresProvider {
    fn describe(&self) -> String {
        // Only the non-secret parts of the connection string
        let visible: Vec<&str> = self
            .conn_str
            .split_whitespace()
            .filter(|part| !part.starts_with("password"))
            .collect();
        format!("postgres {}", visible.join(" "))
    }

    async fn connect(&self) -> Result<Box<dyn Store>, StoreError> {
        let metadata = StoreMetadata::new(DriverFamily::Postgres)
            .with_schema(self.schema.clone())
            .with_catalog(self.catalog.clone());
        let store = PostgresStore::connect(&self.conn_str, metadata).await?;
        Ok(Box::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_hides_password() {
        let provider = PostgresProvider::new("host=db user=repair password=hunter2 dbname=cms");
        let described = provider.describe();
        assert!(described.contains("host=db"));
        assert!(!described.contains("hunter2"));
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn integer_params_are_range_checked() {
        assert!(to_sql_param(&Value::Int(7), &Type::INT4).is_ok());
        assert!(to_sql_param(&Value::Null, &Type::INT2).is_ok());
        assert!(to_sql_param(&Value::Text("12".into()), &Type::INT8).is_ok());
        assert!(matches!(
            to_sql_param(&Value::Int(4294967303), &Type::INT4),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(
            to_sql_param(&Value::Int(40000), &Type::INT2),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(
            to_sql_param(&Value::Text("alice".into()), &Type::INT8),
            Err(StoreError::Decode(_))
        ));
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn connect_without_feature_is_unsupported() {
        let provider = PostgresProvider::new("host=localhost");
        assert!(matches!(provider.connect().await, Err(StoreError::Unsupported(_))));
    }
}

//! Store trait and connection metadata

use crate::value::{Row, Value};
use std::fmt;
use std::time::Duration;

/// SQL dialect family of a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverFamily {
    Sqlite,
    Postgres,
}

impl fmt::Display for DriverFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

/// Schema-qualification metadata for building table references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMetadata {
    pub driver: DriverFamily,

    /// Schema that qualifies every table name, if any
    pub schema: Option<String>,

    /// Catalog (database) name
    pub catalog: Option<String>,
}

impl StoreMetadata {
    pub fn new(driver: DriverFamily) -> Self {
        Self {
            driver,
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

impl fmt::Display for StoreMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.driver)?;
        if let Some(catalog) = &self.catalog {
            write!(f, " {}", catalog)?;
        }
        if let Some(schema) = &self.schema {
            write!(f, " (schema {})", schema)?;
        }
        Ok(())
    }
}

/// Errors raised at the store boundary
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Statement timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Unexpected result: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// A live, exclusively owned connection to the relational store
///
/// Implementations start in auto-commit mode. While auto-commit is off a
/// transaction is opened lazily by the first statement and stays open until
/// `commit`, `rollback` or switching auto-commit back on (which commits).
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    fn metadata(&self) -> &StoreMetadata;

    /// Run a statement that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StoreError>;

    /// Run a statement and return the number of affected rows
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError>;

    async fn auto_commit(&self) -> bool;

    async fn set_auto_commit(&self, enabled: bool) -> Result<(), StoreError>;

    async fn commit(&self) -> Result<(), StoreError>;

    async fn rollback(&self) -> Result<(), StoreError>;

    /// Test the connection
    async fn ping(&self) -> Result<(), StoreError> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }
}

/// Opens connections to the store
#[async_trait::async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Human-readable target description (no credentials)
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Box<dyn Store>, StoreError>;
}

/// Lazy transaction bookkeeping shared by the backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TxState {
    pub auto_commit: bool,
    pub open: bool,
}

impl Default for TxState {
    fn default() -> Self {
        Self {
            auto_commit: true,
            open: false,
        }
    }
}

impl TxState {
    /// Whether a BEGIN must be issued before the next statement
    pub fn needs_begin(&self) -> bool {
        !self.auto_commit && !self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_display() {
        let meta = StoreMetadata::new(DriverFamily::Postgres)
            .with_catalog(Some("cms".into()))
            .with_schema(Some("public".into()));
        assert_eq!(meta.to_string(), "postgres cms (schema public)");
    }

    #[test]
    fn tx_state_begin() {
        let mut tx = TxState::default();
        assert!(!tx.needs_begin());
        tx.auto_commit = false;
        assert!(tx.needs_begin());
        tx.open = true;
        assert!(!tx.needs_begin());
    }
}

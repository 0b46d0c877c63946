//! Recording store decorator for testing
//!
//! `RecordingStore` forwards every call to an inner store and keeps a log of
//! the statements and transaction boundaries it saw. It can also simulate
//! failures and latency:
//!
//! ```rust,ignore
//! let store = RecordingStore::new(Box::new(SqliteStore::in_memory().await?))
//!     .fail_on("DELETE FROM \"relationships\"")
//!     .with_latency(Duration::from_millis(50));
//! let log = store.log_handle();
//! ```

use crate::store::{Store, StoreError, StoreMetadata};
use crate::value::{Row, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Store decorator that records statements and injects failures
pub struct RecordingStore {
    inner: Box<dyn Store>,
    log: Arc<Mutex<Vec<String>>>,
    fail_patterns: Vec<String>,
    latency: Option<Duration>,
}

impl RecordingStore {
    pub fn new(inner: Box<dyn Store>) -> Self {
        Self {
            inner,
            log: Arc::new(Mutex::new(Vec::new())),
            fail_patterns: Vec::new(),
            latency: None,
        }
    }

    /// Fail every statement whose SQL contains `pattern`
    pub fn fail_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_patterns.push(pattern.into());
        self
    }

    /// Delay every statement
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Shared handle to the log, usable after the store is moved into a session
    pub fn log_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }

    /// Snapshot of recorded entries
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, entry: &str) {
        if let Ok(mut log) = self.log.lock() {
            log.push(entry.to_string());
        }
    }

    async fn before_statement(&self, sql: &str) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(pattern) = self.fail_patterns.iter().find(|p| sql.contains(p.as_str())) {
            self.record(&format!("FAILED {}", sql));
            return Err(StoreError::Query(format!("injected failure on '{}'", pattern)));
        }
        self.record(sql);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for RecordingStore {
    fn metadata(&self) -> &StoreMetadata {
        self.inner.metadata()
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        self.before_statement(sql).await?;
        self.inner.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        self.before_statement(sql).await?;
        self.inner.execute(sql, params).await
    }

    async fn auto_commit(&self) -> bool {
        self.inner.auto_commit().await
    }

    async fn set_auto_commit(&self, enabled: bool) -> Result<(), StoreError> {
        self.record(if enabled { "AUTOCOMMIT ON" } else { "AUTOCOMMIT OFF" });
        self.inner.set_auto_commit(enabled).await
    }

    async fn commit(&self) -> Result<(), StoreError> {
        self.record("COMMIT");
        self.inner.commit().await
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        self.record("ROLLBACK");
        self.inner.rollback().await
    }
}

//! Relational store boundary for repair modules
//!
//! This crate defines what the repair engine needs from a database:
//! a connection provider, a parameterized executor with explicit
//! auto-commit control, schema-qualification metadata and a typed
//! statement builder that keeps identifiers and values apart.
//!
//! ## Features
//!
//! - SQLite support is always compiled in (via sqlx)
//! - `postgres` - PostgreSQL support (via tokio-postgres)
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbmend_store::{SqliteStore, Session, Ident};
//!
//! let store = SqliteStore::in_memory().await?;
//! let session = Session::new(Box::new(store), Duration::from_secs(30));
//! let mut stmt = session.builder().statement();
//! stmt.push_sql("SELECT COUNT(*) FROM ");
//! stmt.push_sql(&session.builder().table(&Ident::new("nodes")?));
//! let rows = session.query(&stmt).await?;
//! ```

pub mod value;
pub mod store;
pub mod ident;
pub mod sql;
pub mod session;
pub mod sqlite;
pub mod postgres;
pub mod recording;

pub use value::{Row, Value};
pub use store::{ConnectionProvider, DriverFamily, Store, StoreError, StoreMetadata};
pub use ident::Ident;
pub use sql::{SqlBuilder, Statement};
pub use session::{ForcedCommit, Session, TransactionScope};
pub use sqlite::{SqliteProvider, SqliteStore};
pub use postgres::{PostgresProvider, PostgresStore};
pub use recording::RecordingStore;

use dbmend_core::{DriverKind, StoreConfig};

/// Build a connection provider from the `[store]` section
pub fn provider_from_config(config: &StoreConfig) -> Result<Box<dyn ConnectionProvider>, StoreError> {
    let url = config
        .resolved_url()
        .map_err(|e| StoreError::Config(e.to_string()))?;

    match config.driver {
        DriverKind::Sqlite => Ok(Box::new(
            SqliteProvider::from_url(&url)?
                .with_schema(config.schema.clone())
                .with_catalog(config.catalog.clone()),
        )),
        DriverKind::Postgres => Ok(Box::new(
            PostgresProvider::new(url)
                .with_schema(config.schema.clone())
                .with_catalog(config.catalog.clone()),
        )),
    }
}

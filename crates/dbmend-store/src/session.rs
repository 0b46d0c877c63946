//! Timed sessions and scoped transaction modes

use crate::sql::{SqlBuilder, Statement};
use crate::store::{Store, StoreError, StoreMetadata};
use crate::value::Row;
use std::future::Future;
use std::time::Duration;

/// A connection owned by one module run, with a per-statement timeout
pub struct Session {
    store: Box<dyn Store>,
    timeout: Duration,
    builder: SqlBuilder,
}

impl Session {
    pub fn new(store: Box<dyn Store>, timeout: Duration) -> Self {
        let builder = SqlBuilder::new(store.metadata());
        Self {
            store,
            timeout,
            builder,
        }
    }

    pub fn metadata(&self) -> &StoreMetadata {
        self.store.metadata()
    }

    pub fn builder(&self) -> &SqlBuilder {
        &self.builder
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    pub async fn query(&self, stmt: &Statement) -> Result<Vec<Row>, StoreError> {
        tracing::trace!(sql = stmt.sql(), params = stmt.params().len(), "query");
        self.timed(self.store.query(stmt.sql(), stmt.params())).await
    }

    pub async fn execute(&self, stmt: &Statement) -> Result<u64, StoreError> {
        tracing::trace!(sql = stmt.sql(), params = stmt.params().len(), "execute");
        self.timed(self.store.execute(stmt.sql(), stmt.params())).await
    }

    /// Run a query expected to return exactly one integer
    pub async fn query_int(&self, stmt: &Statement) -> Result<i64, StoreError> {
        let rows = self.query(stmt).await?;
        let row = rows
            .first()
            .ok_or_else(|| StoreError::Decode(format!("no rows returned by: {}", stmt.sql())))?;
        row.int(0)
    }

    pub async fn auto_commit(&self) -> bool {
        self.store.auto_commit().await
    }

    pub async fn set_auto_commit(&self, enabled: bool) -> Result<(), StoreError> {
        self.timed(self.store.set_auto_commit(enabled)).await
    }

    pub async fn commit(&self) -> Result<(), StoreError> {
        self.timed(self.store.commit()).await
    }

    pub async fn rollback(&self) -> Result<(), StoreError> {
        self.timed(self.store.rollback()).await
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.timed(self.store.ping()).await
    }
}

/// Groups statements into one transaction
///
/// If the session was already inside a caller-managed transaction the scope
/// joins it and leaves commit/rollback to the caller. Otherwise it turns
/// auto-commit off, and `commit`/`rollback` restore it.
#[must_use = "a transaction scope must be committed or rolled back"]
pub struct TransactionScope<'a> {
    session: &'a Session,
    owned: bool,
}

impl<'a> TransactionScope<'a> {
    pub async fn begin(session: &'a Session) -> Result<Self, StoreError> {
        let owned = session.auto_commit().await;
        if owned {
            session.set_auto_commit(false).await?;
        }
        Ok(Self { session, owned })
    }

    /// Whether this scope controls the transaction boundary
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        if !self.owned {
            return Ok(());
        }
        if let Err(e) = self.session.commit().await {
            let _ = self.session.rollback().await;
            let _ = self.session.set_auto_commit(true).await;
            return Err(e);
        }
        self.session.set_auto_commit(true).await
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        if !self.owned {
            return Ok(());
        }
        let result = self.session.rollback().await;
        let restore = self.session.set_auto_commit(true).await;
        result.and(restore)
    }
}

/// Runs statements with auto-commit forced on, then restores the prior mode
///
/// Entering commits any work pending in the caller's transaction, as turning
/// auto-commit on does for a JDBC-style connection. Every statement executed
/// inside is durable and visible to other connections as soon as it returns.
#[must_use = "call restore() to put back the prior transaction mode"]
pub struct ForcedCommit<'a> {
    session: &'a Session,
    prior_auto_commit: bool,
}

impl<'a> ForcedCommit<'a> {
    pub async fn enter(session: &'a Session) -> Result<Self, StoreError> {
        let prior_auto_commit = session.auto_commit().await;
        if !prior_auto_commit {
            session.set_auto_commit(true).await?;
        }
        Ok(Self {
            session,
            prior_auto_commit,
        })
    }

    pub fn session(&self) -> &Session {
        self.session
    }

    pub async fn restore(self) -> Result<(), StoreError> {
        if !self.prior_auto_commit {
            self.session.set_auto_commit(false).await?;
        }
        Ok(())
    }
}

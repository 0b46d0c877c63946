//! Identifier block allocation
//!
//! Identifiers for new rows come from a shared counter table holding one
//! row per key: the last identifier handed out. Reserving `count` ids is a
//! single atomic read-increment-write:
//!
//! ```sql
//! UPDATE "id_counters" SET "counter_value" = "counter_value" + ?
//!  WHERE "counter_key" = ? RETURNING "counter_value"
//! ```
//!
//! The update always runs with auto-commit forced on, so the reservation is
//! durable and visible to concurrent allocators before any id from the block
//! is used, even when the caller is in the middle of its own transaction.
//! A reserved block is never returned: ids skipped by a failed caller are
//! simply gaps.

use crate::module::RunContext;
use dbmend_core::CounterTableConfig;
use dbmend_store::{ForcedCommit, Ident, Session, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocError {
    #[error("Counter key '{0}' is missing from the counter table")]
    MissingCounterKey(String),

    #[error("Invalid block size: {0}")]
    InvalidCount(u32),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Location of the shared counter table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterTable {
    pub table: Ident,
    pub key_column: Ident,
    pub value_column: Ident,
}

impl CounterTable {
    pub fn new(table: &str, key_column: &str, value_column: &str) -> Result<Self, StoreError> {
        Ok(Self {
            table: Ident::new(table)?,
            key_column: Ident::new(key_column)?,
            value_column: Ident::new(value_column)?,
        })
    }

    pub fn from_config(config: &CounterTableConfig) -> Result<Self, StoreError> {
        Self::new(&config.table, &config.key_column, &config.value_column)
    }
}

/// Reserves contiguous identifier blocks from the counter table
#[derive(Debug, Clone)]
pub struct IdBlockAllocator {
    counters: CounterTable,
}

impl IdBlockAllocator {
    /// Value returned in preview mode in place of a real identifier
    pub const PREVIEW_SENTINEL: i64 = 0;

    pub fn new(counters: CounterTable) -> Self {
        Self { counters }
    }

    pub fn counters(&self) -> &CounterTable {
        &self.counters
    }

    /// Reserve `count` ids under `key` and return the first one
    ///
    /// The block is `[first, first + count - 1]`. In preview mode nothing is
    /// read or written and [`Self::PREVIEW_SENTINEL`] is returned.
    pub async fn allocate_block(
        &self,
        session: &Session,
        key: &str,
        count: u32,
        preview: bool,
    ) -> Result<i64, AllocError> {
        if preview {
            return Ok(Self::PREVIEW_SENTINEL);
        }
        if count == 0 {
            return Err(AllocError::InvalidCount(count));
        }

        let forced = ForcedCommit::enter(session).await?;
        let reserved = self.reserve(forced.session(), key, count).await;
        let restored = forced.restore().await;

        let first = reserved?;
        restored?;
        tracing::debug!(key, count, first, "reserved identifier block");
        Ok(first)
    }

    async fn reserve(&self, session: &Session, key: &str, count: u32) -> Result<i64, AllocError> {
        let b = session.builder();
        let value = b.column(None, &self.counters.value_column);

        let mut stmt = b.statement();
        stmt.push_sql("UPDATE ")
            .push_sql(&b.table(&self.counters.table))
            .push_sql(" SET ")
            .push_sql(&value)
            .push_sql(" = ")
            .push_sql(&value)
            .push_sql(" + ")
            .push_param(i64::from(count))
            .push_sql(" WHERE ")
            .push_sql(&b.column(None, &self.counters.key_column))
            .push_sql(" = ")
            .push_param(key)
            .push_sql(" RETURNING ")
            .push_sql(&value);

        let rows = session.query(&stmt).await?;
        let row = rows
            .first()
            .ok_or_else(|| AllocError::MissingCounterKey(key.to_string()))?;
        let last = row.int(0)?;
        Ok(last - i64::from(count) + 1)
    }

    /// Current stored value for `key`, `None` if the key has no row
    pub async fn current_value(&self, session: &Session, key: &str) -> Result<Option<i64>, StoreError> {
        let b = session.builder();
        let mut stmt = b.statement();
        stmt.push_sql("SELECT ")
            .push_sql(&b.column(None, &self.counters.value_column))
            .push_sql(" FROM ")
            .push_sql(&b.table(&self.counters.table))
            .push_sql(" WHERE ")
            .push_sql(&b.column(None, &self.counters.key_column))
            .push_sql(" = ")
            .push_param(key);

        match session.query(&stmt).await?.first() {
            Some(row) => row.opt_int(0),
            None => Ok(None),
        }
    }
}

/// Hands out ids one at a time, reserving a new block when the current one
/// runs dry
#[derive(Debug)]
pub struct IdBlock {
    allocator: IdBlockAllocator,
    key: String,
    size: u32,
    next: i64,
    remaining: u32,
}

impl IdBlock {
    pub fn new(allocator: IdBlockAllocator, key: impl Into<String>, size: u32) -> Self {
        Self {
            allocator,
            key: key.into(),
            size: size.max(1),
            next: 0,
            remaining: 0,
        }
    }

    /// Build from the run's counter table and block size
    pub fn for_run(ctx: &RunContext<'_>, key: impl Into<String>) -> Self {
        let settings = ctx.settings();
        Self::new(
            IdBlockAllocator::new(settings.counters.clone()),
            key,
            settings.id_block_size,
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next unused id; the preview sentinel in preview mode
    pub async fn next_id(&mut self, session: &Session, preview: bool) -> Result<i64, AllocError> {
        if preview {
            return Ok(IdBlockAllocator::PREVIEW_SENTINEL);
        }
        if self.remaining == 0 {
            self.next = self
                .allocator
                .allocate_block(session, &self.key, self.size, false)
                .await?;
            self.remaining = self.size;
        }
        let id = self.next;
        self.next += 1;
        self.remaining -= 1;
        Ok(id)
    }
}

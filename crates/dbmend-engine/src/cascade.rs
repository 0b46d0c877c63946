//! Child-row cascades
//!
//! A cascade names a child table whose rows hang off a parent row. Before a
//! parent row is deleted its children are deleted in the same transaction,
//! so an interruption can never leave a child pointing at nothing.

use dbmend_core::CascadeConfig;
use dbmend_store::{Ident, Session, StoreError, Value};

/// Child rows deleted before their parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cascade {
    /// Child table
    pub table: Ident,
    /// Child column holding the parent key
    pub column: Ident,
    /// Parent column the child column refers to
    pub parent_column: Ident,
}

impl Cascade {
    pub fn new(table: &str, column: &str, parent_column: &str) -> Result<Self, StoreError> {
        Ok(Self {
            table: Ident::new(table)?,
            column: Ident::new(column)?,
            parent_column: Ident::new(parent_column)?,
        })
    }

    pub fn from_config(config: &CascadeConfig) -> Result<Self, StoreError> {
        Self::new(&config.table, &config.column, &config.parent_column)
    }

    /// Delete the children of every `parent` row matching the filter
    ///
    /// ```sql
    /// DELETE FROM child WHERE child.column IN
    ///   (SELECT parent_column FROM parent WHERE <filter>)
    /// ```
    pub async fn delete_children(
        &self,
        session: &Session,
        parent: &Ident,
        filter_columns: &[Ident],
        filter_values: &[Value],
    ) -> Result<u64, StoreError> {
        let b = session.builder();
        let filters: Vec<String> = filter_columns.iter().map(|c| b.column(Some("p"), c)).collect();

        let mut stmt = b.statement();
        stmt.push_sql("DELETE FROM ")
            .push_sql(&b.table(&self.table))
            .push_sql(" WHERE ")
            .push_sql(&b.column(None, &self.column))
            .push_sql(" IN (SELECT ")
            .push_sql(&b.column(Some("p"), &self.parent_column))
            .push_sql(" FROM ")
            .push_sql(&b.table(parent))
            .push_sql(" p WHERE ")
            .push_equalities(&filters, filter_values)
            .push_sql(")");

        let deleted = session.execute(&stmt).await?;
        if deleted > 0 {
            tracing::debug!(child = %self.table, parent = %parent, deleted, "cascaded delete");
        }
        Ok(deleted)
    }
}

/// Delete children for every cascade, in declaration order
pub async fn delete_all_children(
    cascades: &[Cascade],
    session: &Session,
    parent: &Ident,
    filter_columns: &[Ident],
    filter_values: &[Value],
) -> Result<u64, StoreError> {
    let mut total = 0;
    for cascade in cascades {
        total += cascade
            .delete_children(session, parent, filter_columns, filter_values)
            .await?;
    }
    Ok(total)
}

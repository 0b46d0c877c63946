//! Duplicate-key merging
//!
//! Rows that share a logical key (but not an id) are merged into a single
//! survivor. For every duplicate, inside one transaction per key group:
//!
//! 1. Columns elsewhere that point at the duplicate are repointed at the
//!    survivor
//! 2. Cascaded children of the duplicate are deleted
//! 3. The duplicate row is deleted
//!
//! Key columns can be compared in their unpacked form, which lets a merge
//! pass see the duplicates an unpack pass is about to create.

use crate::cascade::{delete_all_children, Cascade};
use crate::failsafe::Failsafe;
use crate::module::{ModuleError, RunContext};
use crate::packed::unpacked_expr;
use crate::referential::{ColumnRef, RuleError};
use dbmend_core::{format_id_batches, SurvivorConfig};
use dbmend_store::{DriverFamily, Ident, Session, SqlBuilder, Statement, StoreError, TransactionScope, Value};
use std::collections::HashMap;

/// Column expression giving a table's storage order
fn physical_order(b: &SqlBuilder, alias: &str) -> String {
    match b.driver() {
        DriverFamily::Sqlite => format!("{}.rowid", alias),
        DriverFamily::Postgres => format!("{}.ctid", alias),
    }
}

/// Which row of a duplicate group is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurvivorPolicy {
    /// The smallest id
    #[default]
    LowestId,
    /// The earliest stored row of the group
    FirstEncountered,
}

impl SurvivorPolicy {
    /// Index of the survivor among `ids`, which are in detection order
    pub fn choose(&self, ids: &[Value]) -> usize {
        match self {
            Self::LowestId => ids
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.cmp(b.1))
                .map(|(idx, _)| idx)
                .unwrap_or(0),
            Self::FirstEncountered => 0,
        }
    }
}

impl From<SurvivorConfig> for SurvivorPolicy {
    fn from(config: SurvivorConfig) -> Self {
        match config {
            SurvivorConfig::LowestId => Self::LowestId,
            SurvivorConfig::FirstEncountered => Self::FirstEncountered,
        }
    }
}

/// One logical-key column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub column: Ident,
    /// Compare the low 32 bits only
    pub unpacked: bool,
}

impl KeyColumn {
    pub fn plain(column: Ident) -> Self {
        Self {
            column,
            unpacked: false,
        }
    }

    pub fn unpacked(column: Ident) -> Self {
        Self { column, unpacked: true }
    }

    fn expr(&self, b: &SqlBuilder, alias: &str) -> String {
        let column = b.column(Some(alias), &self.column);
        if self.unpacked {
            unpacked_expr(&column)
        } else {
            column
        }
    }
}

/// Rows sharing one logical key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub key: Vec<Value>,
    pub survivor: Value,
    pub duplicates: Vec<Value>,
}

/// A table whose rows must be unique on a logical key
#[derive(Debug, Clone)]
pub struct DuplicateRule {
    table: Ident,
    id_column: Ident,
    keys: Vec<KeyColumn>,
    references: Vec<ColumnRef>,
    cascades: Vec<Cascade>,
    survivor: SurvivorPolicy,
    failsafe: Option<Failsafe>,
}

impl DuplicateRule {
    pub fn new(table: Ident, id_column: Ident, keys: Vec<KeyColumn>) -> Result<Self, RuleError> {
        if keys.is_empty() {
            return Err(RuleError::Shape {
                table: table.to_string(),
                reason: "at least one key column is required".to_string(),
            });
        }
        Ok(Self {
            table,
            id_column,
            keys,
            references: Vec::new(),
            cascades: Vec::new(),
            survivor: SurvivorPolicy::default(),
            failsafe: None,
        })
    }

    pub fn with_references(mut self, references: Vec<ColumnRef>) -> Self {
        self.references = references;
        self
    }

    pub fn with_cascades(mut self, cascades: Vec<Cascade>) -> Self {
        self.cascades = cascades;
        self
    }

    pub fn with_survivor(mut self, survivor: SurvivorPolicy) -> Self {
        self.survivor = survivor;
        self
    }

    pub fn with_failsafe(mut self, failsafe: Option<Failsafe>) -> Self {
        self.failsafe = failsafe;
        self
    }

    pub fn table(&self) -> &Ident {
        &self.table
    }

    /// Rows that share their key with another row
    ///
    /// Ordered by key, then by the order rows were stored in (`rowid` on
    /// SQLite, `ctid` on PostgreSQL). `FirstEncountered` keeps the earliest
    /// stored row of each group. On SQLite the table must have a rowid.
    pub fn detection_statement(&self, b: &SqlBuilder) -> Statement {
        let mut select = vec![b.column(Some("t"), &self.id_column)];
        select.extend(self.keys.iter().map(|k| k.expr(b, "t")));

        let mut matches: Vec<String> = self
            .keys
            .iter()
            .map(|k| format!("{} = {}", k.expr(b, "o"), k.expr(b, "t")))
            .collect();
        matches.push(format!(
            "{} <> {}",
            b.column(Some("o"), &self.id_column),
            b.column(Some("t"), &self.id_column)
        ));

        // Key columns, then storage order, so detection order is stable
        let mut order: Vec<String> = (2..=select.len()).map(|i| i.to_string()).collect();
        order.push(physical_order(b, "t"));

        let mut stmt = b.statement();
        stmt.push_sql("SELECT ")
            .push_sql(&select.join(", "))
            .push_sql(" FROM ")
            .push_sql(&b.table(&self.table))
            .push_sql(" t WHERE EXISTS (SELECT 1 FROM ")
            .push_sql(&b.table(&self.table))
            .push_sql(" o WHERE ")
            .push_sql(&matches.join(" AND "))
            .push_sql(") ORDER BY ")
            .push_sql(&order.join(", "));
        stmt
    }

    /// Group duplicate rows by key, choosing a survivor for each group
    pub async fn scan(&self, session: &Session) -> Result<Vec<DuplicateGroup>, StoreError> {
        let rows = session.query(&self.detection_statement(session.builder())).await?;

        let mut order: Vec<Vec<Value>> = Vec::new();
        let mut members: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();
        for row in rows {
            let mut values = row.into_values();
            if values.len() != self.keys.len() + 1 {
                return Err(StoreError::Decode(format!(
                    "duplicate query for {} returned {} columns",
                    self.table,
                    values.len()
                )));
            }
            let key = values.split_off(1);
            let id = values.remove(0);
            let ids = members.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Vec::new()
            });
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        order.sort();
        let mut groups = Vec::with_capacity(order.len());
        for key in order {
            let mut ids = members.remove(&key).unwrap_or_default();
            if ids.len() < 2 {
                continue;
            }
            let survivor = ids.remove(self.survivor.choose(&ids));
            ids.sort();
            groups.push(DuplicateGroup {
                key,
                survivor,
                duplicates: ids,
            });
        }
        Ok(groups)
    }

    fn describe_key(&self, key: &[Value]) -> String {
        self.keys
            .iter()
            .zip(key)
            .map(|(k, v)| format!("{}={}", k.column, v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Merge one group in its own transaction; returns rows deleted
    pub async fn merge_group(&self, session: &Session, group: &DuplicateGroup) -> Result<u64, StoreError> {
        let scope = TransactionScope::begin(session).await?;
        match self.merge_statements(session, group).await {
            Ok(deleted) => {
                scope.commit().await?;
                Ok(deleted)
            }
            Err(e) => {
                if let Err(rollback) = scope.rollback().await {
                    tracing::warn!("rollback after failed merge also failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn merge_statements(&self, session: &Session, group: &DuplicateGroup) -> Result<u64, StoreError> {
        let b = session.builder();
        let id_filter = [self.id_column.clone()];
        let mut deleted = 0;

        for duplicate in &group.duplicates {
            for reference in &self.references {
                let column = b.column(None, &reference.column);
                let mut stmt = b.statement();
                stmt.push_sql("UPDATE ")
                    .push_sql(&b.table(&reference.table))
                    .push_sql(" SET ")
                    .push_sql(&column)
                    .push_sql(" = ")
                    .push_param(group.survivor.clone())
                    .push_sql(" WHERE ")
                    .push_sql(&column)
                    .push_sql(" = ")
                    .push_param(duplicate.clone());
                session.execute(&stmt).await?;
            }

            delete_all_children(
                &self.cascades,
                session,
                &self.table,
                &id_filter,
                std::slice::from_ref(duplicate),
            )
            .await?;

            let mut stmt = b.statement();
            stmt.push_sql("DELETE FROM ")
                .push_sql(&b.table(&self.table))
                .push_sql(" WHERE ")
                .push_sql(&b.column(None, &self.id_column))
                .push_sql(" = ")
                .push_param(duplicate.clone());
            deleted += session.execute(&stmt).await?;
        }
        Ok(deleted)
    }

    /// Detect and merge, returning the groups that were (or would be) merged
    pub async fn run(&self, ctx: &mut RunContext<'_>) -> Result<Vec<DuplicateGroup>, ModuleError> {
        let groups = self.scan(ctx.session()).await?;
        if groups.is_empty() {
            ctx.log().info(format!("No duplicate keys found in {}", self.table));
            return Ok(groups);
        }

        let duplicate_count: usize = groups.iter().map(|g| g.duplicates.len()).sum();
        if let Some(failsafe) = &self.failsafe {
            let verdict = failsafe.check(ctx.session(), duplicate_count).await?;
            if !verdict.is_allowed() {
                ctx.mark_refused();
                ctx.log().warning(format!(
                    "Refusing to merge duplicate rows in {}: {}",
                    self.table, verdict
                ));
                return Ok(Vec::new());
            }
        }

        if ctx.preview() {
            for group in &groups {
                let key = self.describe_key(&group.key);
                for duplicate in &group.duplicates {
                    let message = format!(
                        "Would merge {} row {} into {} ({})",
                        self.table, duplicate, group.survivor, key
                    );
                    ctx.log().preview_for(duplicate.to_string(), message);
                }
            }
            ctx.log().preview(format!(
                "{} duplicate rows in {} would be merged into {} survivors",
                duplicate_count,
                self.table,
                groups.len()
            ));
            return Ok(groups);
        }

        let mut merged = Vec::new();
        let mut outcome = Ok(());
        for group in groups {
            if let Err(e) = ctx.check_cancelled() {
                outcome = Err(e);
                break;
            }
            match self.merge_group(ctx.session(), &group).await {
                Ok(0) => {}
                Ok(_) => merged.push(group),
                Err(e) => {
                    outcome = Err(e.into());
                    break;
                }
            }
        }

        if !merged.is_empty() {
            let removed: Vec<String> = merged
                .iter()
                .flat_map(|g| g.duplicates.iter().map(|d| d.to_string()))
                .collect();
            let mut message = format!(
                "Merged {} duplicate rows in {} into {} survivors:",
                removed.len(),
                self.table,
                merged.len()
            );
            for line in format_id_batches(&removed) {
                message.push('\n');
                message.push_str(&line);
            }
            ctx.log().success(message);
        }
        outcome.map(|_| merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbmend_store::{DriverFamily, StoreMetadata};

    fn ident(name: &str) -> Ident {
        Ident::new(name).unwrap()
    }

    #[test]
    fn lowest_id_survives() {
        let ids = vec![Value::Int(5), Value::Int(3), Value::Int(9)];
        assert_eq!(SurvivorPolicy::LowestId.choose(&ids), 1);
        assert_eq!(SurvivorPolicy::FirstEncountered.choose(&ids), 0);
    }

    #[test]
    fn requires_key_columns() {
        assert!(DuplicateRule::new(ident("acl"), ident("id"), Vec::new()).is_err());
    }

    #[test]
    fn detection_query_compares_unpacked_keys() {
        let rule = DuplicateRule::new(
            ident("acl"),
            ident("id"),
            vec![KeyColumn::unpacked(ident("node_ref")), KeyColumn::plain(ident("principal"))],
        )
        .unwrap();
        let b = SqlBuilder::new(&StoreMetadata::new(DriverFamily::Sqlite));
        let sql = rule.detection_statement(&b).sql().to_string();

        assert!(sql.starts_with("SELECT t.\"id\", (t.\"node_ref\" & 4294967295), t.\"principal\" FROM \"acl\" t"));
        assert!(sql.contains("(o.\"node_ref\" & 4294967295) = (t.\"node_ref\" & 4294967295)"));
        assert!(sql.contains("o.\"principal\" = t.\"principal\" AND o.\"id\" <> t.\"id\""));
        assert!(sql.ends_with(") ORDER BY 2, 3, t.rowid"));
    }
}

//! Referential integrity scanning and repair
//!
//! A [`ReferentialRule`] describes a dependent table whose foreign-key-shaped
//! columns must point at existing rows:
//!
//! - Up to three join columns per rule
//! - Each join column may point into up to three target `table.column`s;
//!   a value is valid if it is found in any of them
//! - A row is orphaned if any non-NULL join column is dangling
//!
//! The detection query is a single `SELECT DISTINCT` over the dependent
//! table with one `NOT EXISTS` per target, so the store does the work and
//! only candidates come back:
//!
//! ```sql
//! SELECT DISTINCT d."id", d."from_id", d."to_id", <dangling flags>
//!   FROM "relationships" d
//!  WHERE (d."from_id" IS NOT NULL
//!         AND NOT EXISTS (SELECT 1 FROM "nodes" r WHERE r."id" = d."from_id"))
//!     OR (d."to_id" IS NOT NULL
//!         AND NOT EXISTS (SELECT 1 FROM "nodes" r WHERE r."id" = d."to_id"))
//!  ORDER BY 1, 2, 3
//! ```
//!
//! [`ReferentialRepair`] turns candidates into outcomes: previews in preview
//! mode, otherwise one transaction per candidate that deletes the cascaded
//! children first and the orphan last.

use crate::cascade::{delete_all_children, Cascade};
use crate::failsafe::Failsafe;
use crate::module::{ModuleError, RunContext};
use dbmend_core::{format_id_batches, ColumnTarget, OrphanActionConfig};
use dbmend_store::{Ident, Session, SqlBuilder, Statement, StoreError, TransactionScope, Value};
use std::collections::HashSet;
use thiserror::Error;

/// Most join columns one rule may check
pub const MAX_JOINS: usize = 3;

/// Most target columns one join column may point into
pub const MAX_TARGETS: usize = 3;

/// Errors building a rule
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid identifier: {0}")]
    Ident(#[from] StoreError),

    #[error("Invalid rule for '{table}': {reason}")]
    Shape { table: String, reason: String },
}

/// A `table.column` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Ident,
    pub column: Ident,
}

impl ColumnRef {
    pub fn new(table: &str, column: &str) -> Result<Self, StoreError> {
        Ok(Self {
            table: Ident::new(table)?,
            column: Ident::new(column)?,
        })
    }

    pub fn from_config(config: &ColumnTarget) -> Result<Self, StoreError> {
        Self::new(&config.table, &config.column)
    }
}

/// One dependent column and the target columns it may point into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinColumn {
    pub column: Ident,
    pub targets: Vec<ColumnRef>,
}

impl JoinColumn {
    pub fn new(column: Ident, targets: Vec<ColumnRef>) -> Self {
        Self { column, targets }
    }
}

/// What happens to an orphaned row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanAction {
    /// Delete the row and its cascaded children
    #[default]
    Delete,
    /// Set the dangling columns to NULL
    Nullify,
}

impl OrphanAction {
    fn verb(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Nullify => "nullify",
        }
    }

    fn past(&self) -> &'static str {
        match self {
            Self::Delete => "deleted",
            Self::Nullify => "nullified",
        }
    }
}

impl From<OrphanActionConfig> for OrphanAction {
    fn from(config: OrphanActionConfig) -> Self {
        match config {
            OrphanActionConfig::Delete => Self::Delete,
            OrphanActionConfig::Nullify => Self::Nullify,
        }
    }
}

/// A dependent row with at least one dangling join column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrphanCandidate {
    /// Row id, when the rule has an id column
    pub id: Option<Value>,
    /// Join column values, in rule order
    pub values: Vec<Value>,
    /// Which join columns are dangling, in rule order
    pub dangling: Vec<bool>,
}

impl OrphanCandidate {
    /// Identifier used in outcomes: the row id, or the join tuple
    pub fn subject(&self) -> String {
        match &self.id {
            Some(id) => id.to_string(),
            None if self.values.len() == 1 => self.values[0].to_string(),
            None => {
                let parts: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
                format!("({})", parts.join(", "))
            }
        }
    }
}

/// Dependent table plus the join columns that must resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferentialRule {
    dependent: Ident,
    id_column: Option<Ident>,
    joins: Vec<JoinColumn>,
}

impl ReferentialRule {
    pub fn new(dependent: Ident, id_column: Option<Ident>, joins: Vec<JoinColumn>) -> Result<Self, RuleError> {
        let shape = |reason: String| RuleError::Shape {
            table: dependent.to_string(),
            reason,
        };
        if joins.is_empty() || joins.len() > MAX_JOINS {
            return Err(shape(format!("expected 1 to {} join columns, got {}", MAX_JOINS, joins.len())));
        }
        for join in &joins {
            if join.targets.is_empty() || join.targets.len() > MAX_TARGETS {
                return Err(shape(format!(
                    "join column '{}' needs 1 to {} targets, got {}",
                    join.column,
                    MAX_TARGETS,
                    join.targets.len()
                )));
            }
        }
        Ok(Self {
            dependent,
            id_column,
            joins,
        })
    }

    pub fn dependent(&self) -> &Ident {
        &self.dependent
    }

    pub fn id_column(&self) -> Option<&Ident> {
        self.id_column.as_ref()
    }

    pub fn joins(&self) -> &[JoinColumn] {
        &self.joins
    }

    /// Columns that identify one candidate row: id first, then join columns
    fn key_columns(&self) -> Vec<Ident> {
        self.id_column
            .iter()
            .chain(self.joins.iter().map(|j| &j.column))
            .cloned()
            .collect()
    }

    fn key_values(&self, candidate: &OrphanCandidate) -> Vec<Value> {
        candidate.id.iter().chain(candidate.values.iter()).cloned().collect()
    }

    /// `d.col IS NOT NULL AND NOT EXISTS (...) AND NOT EXISTS (...)`
    fn dangling_condition(b: &SqlBuilder, join: &JoinColumn) -> String {
        let column = b.column(Some("d"), &join.column);
        let mut condition = format!("{} IS NOT NULL", column);
        for target in &join.targets {
            condition.push_str(&format!(
                " AND NOT EXISTS (SELECT 1 FROM {} r WHERE {} = {})",
                b.table(&target.table),
                b.column(Some("r"), &target.column),
                column
            ));
        }
        condition
    }

    /// Build the detection query
    pub fn detection_statement(&self, b: &SqlBuilder) -> Statement {
        let conditions: Vec<String> = self
            .joins
            .iter()
            .map(|j| Self::dangling_condition(b, j))
            .collect();

        let mut select: Vec<String> = self
            .key_columns()
            .iter()
            .map(|c| b.column(Some("d"), c))
            .collect();
        let ordinals: Vec<String> = (1..=select.len()).map(|i| i.to_string()).collect();
        select.extend(
            conditions
                .iter()
                .map(|c| format!("CASE WHEN {} THEN 1 ELSE 0 END", c)),
        );

        let filter: Vec<String> = conditions.iter().map(|c| format!("({})", c)).collect();

        let mut stmt = b.statement();
        stmt.push_sql("SELECT DISTINCT ")
            .push_sql(&select.join(", "))
            .push_sql(" FROM ")
            .push_sql(&b.table(&self.dependent))
            .push_sql(" d WHERE ")
            .push_sql(&filter.join(" OR "))
            .push_sql(" ORDER BY ")
            .push_sql(&ordinals.join(", "));
        stmt
    }

    /// Find every orphaned row, in stable order without repeats
    pub async fn scan(&self, session: &Session) -> Result<Vec<OrphanCandidate>, StoreError> {
        let stmt = self.detection_statement(session.builder());
        let rows = session.query(&stmt).await?;

        let offset = usize::from(self.id_column.is_some());
        let width = self.joins.len();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for row in rows {
            let mut values = row.into_values();
            if values.len() != offset + 2 * width {
                return Err(StoreError::Decode(format!(
                    "detection query for {} returned {} columns",
                    self.dependent,
                    values.len()
                )));
            }
            let dangling = values
                .split_off(offset + width)
                .iter()
                .map(|flag| flag.as_i64() == Some(1))
                .collect();
            let id = if offset == 1 { Some(values.remove(0)) } else { None };

            let candidate = OrphanCandidate { id, values, dangling };
            if seen.insert(candidate.clone()) {
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }

    /// Human-readable list of the dangling columns of a candidate
    pub fn describe(&self, candidate: &OrphanCandidate) -> String {
        let parts: Vec<String> = self
            .joins
            .iter()
            .zip(&candidate.values)
            .zip(&candidate.dangling)
            .filter(|(_, dangling)| **dangling)
            .map(|((join, value), _)| format!("{}={}", join.column, value))
            .collect();
        format!("dangling {}", parts.join(", "))
    }
}

/// Scans a rule and repairs every candidate
#[derive(Debug, Clone)]
pub struct ReferentialRepair {
    rule: ReferentialRule,
    cascades: Vec<Cascade>,
    action: OrphanAction,
    failsafe: Option<Failsafe>,
}

impl ReferentialRepair {
    pub fn new(rule: ReferentialRule) -> Self {
        Self {
            rule,
            cascades: Vec::new(),
            action: OrphanAction::Delete,
            failsafe: None,
        }
    }

    pub fn with_cascades(mut self, cascades: Vec<Cascade>) -> Self {
        self.cascades = cascades;
        self
    }

    pub fn with_action(mut self, action: OrphanAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_failsafe(mut self, failsafe: Option<Failsafe>) -> Self {
        self.failsafe = failsafe;
        self
    }

    pub fn rule(&self) -> &ReferentialRule {
        &self.rule
    }

    /// Detect and repair, returning the candidates that were (or in preview
    /// mode would be) repaired
    pub async fn run(&self, ctx: &mut RunContext<'_>) -> Result<Vec<OrphanCandidate>, ModuleError> {
        let table = self.rule.dependent().clone();
        let candidates = self.rule.scan(ctx.session()).await?;

        if candidates.is_empty() {
            ctx.log().info(format!("No orphaned rows found in {}", table));
            return Ok(Vec::new());
        }

        if let Some(failsafe) = &self.failsafe {
            let verdict = failsafe.check(ctx.session(), candidates.len()).await?;
            if !verdict.is_allowed() {
                ctx.mark_refused();
                ctx.log().warning(format!(
                    "Refusing to {} orphaned rows in {}: {}",
                    self.action.verb(),
                    table,
                    verdict
                ));
                return Ok(Vec::new());
            }
        }

        if ctx.preview() {
            for candidate in &candidates {
                let message = format!(
                    "Would {} orphaned row in {} ({})",
                    self.action.verb(),
                    table,
                    self.rule.describe(candidate)
                );
                ctx.log().preview_for(candidate.subject(), message);
            }
            ctx.log().preview(format!(
                "{} orphaned rows in {} would be {}",
                candidates.len(),
                table,
                self.action.past()
            ));
            return Ok(candidates);
        }

        let mut repaired = Vec::new();
        let outcome = self.repair_all(ctx, candidates, &mut repaired).await;

        if !repaired.is_empty() {
            let subjects: Vec<String> = repaired.iter().map(|c| c.subject()).collect();
            let mut message = format!(
                "{} {} orphaned rows in {}:",
                capitalize(self.action.past()),
                repaired.len(),
                table
            );
            for line in format_id_batches(&subjects) {
                message.push('\n');
                message.push_str(&line);
            }
            ctx.log().success(message);
        } else if outcome.is_ok() {
            ctx.log().info(format!("Orphaned rows in {} were already repaired", table));
        }

        outcome.map(|_| repaired)
    }

    async fn repair_all(
        &self,
        ctx: &RunContext<'_>,
        candidates: Vec<OrphanCandidate>,
        repaired: &mut Vec<OrphanCandidate>,
    ) -> Result<(), ModuleError> {
        for candidate in candidates {
            ctx.check_cancelled()?;
            if self.repair_one(ctx.session(), &candidate).await? > 0 {
                repaired.push(candidate);
            }
        }
        Ok(())
    }

    /// Repair one candidate in its own transaction
    pub async fn repair_one(&self, session: &Session, candidate: &OrphanCandidate) -> Result<u64, StoreError> {
        let scope = TransactionScope::begin(session).await?;
        let result = match self.action {
            OrphanAction::Delete => self.delete(session, candidate).await,
            OrphanAction::Nullify => self.nullify(session, candidate).await,
        };
        match result {
            Ok(affected) => {
                scope.commit().await?;
                Ok(affected)
            }
            Err(e) => {
                if let Err(rollback) = scope.rollback().await {
                    tracing::warn!("rollback after failed repair also failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn delete(&self, session: &Session, candidate: &OrphanCandidate) -> Result<u64, StoreError> {
        let key_columns = self.rule.key_columns();
        let key_values = self.rule.key_values(candidate);

        delete_all_children(&self.cascades, session, self.rule.dependent(), &key_columns, &key_values).await?;

        let b = session.builder();
        let filters: Vec<String> = key_columns.iter().map(|c| b.column(None, c)).collect();
        let mut stmt = b.statement();
        stmt.push_sql("DELETE FROM ")
            .push_sql(&b.table(self.rule.dependent()))
            .push_sql(" WHERE ")
            .push_equalities(&filters, &key_values);
        session.execute(&stmt).await
    }

    async fn nullify(&self, session: &Session, candidate: &OrphanCandidate) -> Result<u64, StoreError> {
        let b = session.builder();
        let assignments: Vec<String> = self
            .rule
            .joins()
            .iter()
            .zip(&candidate.dangling)
            .filter(|(_, dangling)| **dangling)
            .map(|(join, _)| format!("{} = NULL", b.column(None, &join.column)))
            .collect();
        if assignments.is_empty() {
            return Ok(0);
        }

        let filters: Vec<String> = self
            .rule
            .key_columns()
            .iter()
            .map(|c| b.column(None, c))
            .collect();
        let mut stmt = b.statement();
        stmt.push_sql("UPDATE ")
            .push_sql(&b.table(self.rule.dependent()))
            .push_sql(" SET ")
            .push_sql(&assignments.join(", "))
            .push_sql(" WHERE ")
            .push_equalities(&filters, &self.rule.key_values(candidate));
        session.execute(&stmt).await
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

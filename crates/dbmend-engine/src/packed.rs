//! Packed identifier repair
//!
//! Some writers stored a type discriminant in the upper 32 bits of an id
//! column. Only the low 32 bits are the identifier, so any value outside
//! `[0, 2^32 - 1]` is corrupt and is rewritten to `value & 0xFFFFFFFF`.
//! The mask is applied here, never in SQL, so every dialect sees the same
//! result.

use crate::module::{ModuleError, RunContext};
use dbmend_core::format_id_batches;
use dbmend_store::{Ident, Session, StoreError, Value};

/// Mask selecting the identifier bits
pub const LOW_32_MASK: i64 = 0xFFFF_FFFF;

/// Largest value that is already unpacked, as SQL text
const MAX_UNPACKED_SQL: &str = "4294967295";

/// Low 32 bits of a packed value
pub fn unpack(value: i64) -> i64 {
    value & LOW_32_MASK
}

/// True when any of the upper 32 bits are set
pub fn is_packed(value: i64) -> bool {
    unpack(value) != value
}

/// SQL expression for the unpacked value of a column
///
/// Used to compare keys as they will be once the unpack pass has run.
pub fn unpacked_expr(column: &str) -> String {
    format!("({} & {})", column, MAX_UNPACKED_SQL)
}

/// One packed value found by the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedValue {
    pub id: Option<Value>,
    pub value: i64,
}

impl PackedValue {
    pub fn unpacked(&self) -> i64 {
        unpack(self.value)
    }

    pub fn subject(&self) -> String {
        match &self.id {
            Some(id) => id.to_string(),
            None => self.value.to_string(),
        }
    }
}

/// A column that may hold packed identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedColumn {
    table: Ident,
    id_column: Option<Ident>,
    column: Ident,
}

impl PackedColumn {
    pub fn new(table: Ident, id_column: Option<Ident>, column: Ident) -> Self {
        Self {
            table,
            id_column,
            column,
        }
    }

    pub fn table(&self) -> &Ident {
        &self.table
    }

    pub fn column(&self) -> &Ident {
        &self.column
    }

    /// Find every row whose column is outside the unpacked range
    pub async fn scan(&self, session: &Session) -> Result<Vec<PackedValue>, StoreError> {
        let b = session.builder();
        let column = b.column(None, &self.column);

        let mut select = Vec::new();
        if let Some(id) = &self.id_column {
            select.push(b.column(None, id));
        }
        select.push(column.clone());
        let ordinals: Vec<String> = (1..=select.len()).map(|i| i.to_string()).collect();

        let mut stmt = b.statement();
        stmt.push_sql("SELECT ")
            .push_sql(&select.join(", "))
            .push_sql(" FROM ")
            .push_sql(&b.table(&self.table))
            .push_sql(&format!(
                " WHERE {} < 0 OR {} > {} ORDER BY {}",
                column,
                column,
                MAX_UNPACKED_SQL,
                ordinals.join(", ")
            ));

        let rows = session.query(&stmt).await?;
        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let (id, value_idx) = match self.id_column {
                Some(_) => (Some(row.get(0).cloned().unwrap_or(Value::Null)), 1),
                None => (None, 0),
            };
            found.push(PackedValue {
                id,
                value: row.int(value_idx)?,
            });
        }
        Ok(found)
    }

    /// Rewrite one packed value; returns the number of rows changed
    pub async fn unpack_one(&self, session: &Session, packed: &PackedValue) -> Result<u64, StoreError> {
        let b = session.builder();
        let column = b.column(None, &self.column);

        let mut stmt = b.statement();
        stmt.push_sql("UPDATE ")
            .push_sql(&b.table(&self.table))
            .push_sql(" SET ")
            .push_sql(&column)
            .push_sql(" = ")
            .push_param(packed.unpacked())
            .push_sql(" WHERE ")
            .push_sql(&column)
            .push_sql(" = ")
            .push_param(packed.value);
        if let (Some(id_column), Some(id)) = (&self.id_column, &packed.id) {
            stmt.push_sql(" AND ")
                .push_equalities(&[b.column(None, id_column)], std::slice::from_ref(id));
        }
        session.execute(&stmt).await
    }

    /// Detect and unpack, returning the values that were (or would be) fixed
    pub async fn run(&self, ctx: &mut RunContext<'_>) -> Result<Vec<PackedValue>, ModuleError> {
        let found = self.scan(ctx.session()).await?;
        if found.is_empty() {
            ctx.log().info(format!("No packed identifiers found in {}.{}", self.table, self.column));
            return Ok(found);
        }

        if ctx.preview() {
            for packed in &found {
                let message = format!(
                    "Would unpack {}.{} from {} to {}",
                    self.table,
                    self.column,
                    packed.value,
                    packed.unpacked()
                );
                ctx.log().preview_for(packed.subject(), message);
            }
            ctx.log().preview(format!(
                "{} packed values in {}.{} would be unpacked",
                found.len(),
                self.table,
                self.column
            ));
            return Ok(found);
        }

        let mut fixed = Vec::new();
        let mut outcome = Ok(());
        for packed in found {
            if let Err(e) = ctx.check_cancelled() {
                outcome = Err(e);
                break;
            }
            match self.unpack_one(ctx.session(), &packed).await {
                Ok(0) => {}
                Ok(_) => fixed.push(packed),
                Err(e) => {
                    outcome = Err(e.into());
                    break;
                }
            }
        }

        if !fixed.is_empty() {
            let subjects: Vec<String> = fixed.iter().map(|p| p.subject()).collect();
            let mut message = format!("Unpacked {} values in {}.{}:", fixed.len(), self.table, self.column);
            for line in format_id_batches(&subjects) {
                message.push('\n');
                message.push_str(&line);
            }
            ctx.log().success(message);
        }
        outcome.map(|_| fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpacks_low_bits() {
        assert_eq!(unpack((1i64 << 32) + 7), 7);
        assert_eq!(unpack((5i64 << 32) | 0xFFFF_FFFF), 0xFFFF_FFFF);
        assert_eq!(unpack(-1), 0xFFFF_FFFF);
        assert_eq!(unpack(42), 42);
    }

    #[test]
    fn detects_packed_values() {
        assert!(is_packed(1i64 << 32));
        assert!(is_packed(-1));
        assert!(!is_packed(0));
        assert!(!is_packed(0xFFFF_FFFF));
    }

    #[test]
    fn unpacked_expression() {
        assert_eq!(unpacked_expr("t.\"ref\""), "(t.\"ref\" & 4294967295)");
    }
}

//! Typed statement builder
//!
//! `SqlBuilder` renders schema-qualified, quoted identifiers for one
//! connection; `Statement` accumulates SQL text and bound values side by side,
//! rendering placeholders in the driver's syntax.

use crate::ident::Ident;
use crate::store::{DriverFamily, StoreMetadata};
use crate::value::Value;

/// Renders identifiers for one connection's dialect and schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBuilder {
    driver: DriverFamily,
    schema: Option<Ident>,
}

impl SqlBuilder {
    /// Build from connection metadata
    ///
    /// A schema name that is not a valid identifier is ignored rather than
    /// interpolated.
    pub fn new(metadata: &StoreMetadata) -> Self {
        let schema = metadata.schema.as_deref().and_then(|s| {
            Ident::new(s)
                .map_err(|e| tracing::warn!("ignoring schema qualifier: {}", e))
                .ok()
        });
        Self {
            driver: metadata.driver,
            schema,
        }
    }

    pub fn driver(&self) -> DriverFamily {
        self.driver
    }

    /// Fully qualified, quoted table reference
    pub fn table(&self, table: &Ident) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema.quoted(), table.quoted()),
            None => table.quoted(),
        }
    }

    /// Quoted column, optionally prefixed with a table alias
    pub fn column(&self, alias: Option<&str>, column: &Ident) -> String {
        match alias {
            Some(alias) => format!("{}.{}", alias, column.quoted()),
            None => column.quoted(),
        }
    }

    /// Start an empty statement in this dialect
    pub fn statement(&self) -> Statement {
        Statement {
            driver: self.driver,
            sql: String::new(),
            params: Vec::new(),
        }
    }
}

/// SQL text plus its bound parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    driver: DriverFamily,
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    /// Append literal SQL (keywords, quoted identifiers, punctuation)
    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Bind a value and append its placeholder
    pub fn push_param(&mut self, value: impl Into<Value>) -> &mut Self {
        self.params.push(value.into());
        match self.driver {
            DriverFamily::Sqlite => self.sql.push('?'),
            DriverFamily::Postgres => {
                let n = self.params.len();
                self.sql.push_str(&format!("${}", n));
            }
        }
        self
    }

    /// Append `col = ? AND col2 = ? ...` for the given columns and values
    ///
    /// NULL values render as `col IS NULL` without a parameter.
    pub fn push_equalities(&mut self, columns: &[String], values: &[Value]) -> &mut Self {
        for (i, (column, value)) in columns.iter().zip(values).enumerate() {
            if i > 0 {
                self.push_sql(" AND ");
            }
            self.push_sql(column);
            if value.is_null() {
                self.push_sql(" IS NULL");
            } else {
                self.push_sql(" = ");
                self.push_param(value.clone());
            }
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(driver: DriverFamily, schema: Option<&str>) -> SqlBuilder {
        SqlBuilder::new(&StoreMetadata::new(driver).with_schema(schema.map(String::from)))
    }

    #[test]
    fn qualifies_tables() {
        let table = Ident::new("nodes").unwrap();
        assert_eq!(builder(DriverFamily::Sqlite, None).table(&table), "\"nodes\"");
        assert_eq!(
            builder(DriverFamily::Postgres, Some("cms")).table(&table),
            "\"cms\".\"nodes\""
        );
    }

    #[test]
    fn invalid_schema_is_not_interpolated() {
        let table = Ident::new("nodes").unwrap();
        let b = builder(DriverFamily::Postgres, Some("x\"; DROP"));
        assert_eq!(b.table(&table), "\"nodes\"");
    }

    #[test]
    fn placeholders_per_driver() {
        let mut stmt = builder(DriverFamily::Postgres, None).statement();
        stmt.push_sql("DELETE FROM t WHERE a = ").push_param(1i64);
        stmt.push_sql(" AND b = ").push_param("x");
        assert_eq!(stmt.sql(), "DELETE FROM t WHERE a = $1 AND b = $2");
        assert_eq!(stmt.params().len(), 2);

        let mut stmt = builder(DriverFamily::Sqlite, None).statement();
        stmt.push_sql("DELETE FROM t WHERE a = ").push_param(1i64);
        assert_eq!(stmt.sql(), "DELETE FROM t WHERE a = ?");
    }

    #[test]
    fn equalities_handle_null() {
        let mut stmt = builder(DriverFamily::Postgres, None).statement();
        stmt.push_equalities(
            &["\"a\"".to_string(), "\"b\"".to_string()],
            &[Value::Null, Value::Int(9)],
        );
        assert_eq!(stmt.sql(), "\"a\" IS NULL AND \"b\" = $1");
        assert_eq!(stmt.params(), &[Value::Int(9)]);
    }
}

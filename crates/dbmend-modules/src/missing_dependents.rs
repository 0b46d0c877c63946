//! Missing dependent row creation
//!
//! Some parent rows must always have a dependent row (a node and its
//! properties row, say). This module finds parents without one and inserts
//! it, taking new ids from the shared counter in blocks.

use dbmend_core::{format_id_batches, ColumnDefault, MissingDependentsConfig};
use dbmend_engine::{IdBlock, ModuleError, RepairModule, RuleError, RunContext};
use dbmend_store::{Ident, Session, StoreError, Value};

pub struct MissingDependentsModule {
    name: String,
    parent_table: Ident,
    parent_key: Ident,
    table: Ident,
    id_column: Ident,
    parent_column: Ident,
    counter_key: String,
    defaults: Vec<(Ident, Value)>,
    deregister: bool,
}

impl MissingDependentsModule {
    pub fn from_config(config: &MissingDependentsConfig) -> Result<Self, RuleError> {
        let mut defaults = Vec::with_capacity(config.defaults.len());
        for (column, value) in &config.defaults {
            let value = match value {
                ColumnDefault::Int(v) => Value::Int(*v),
                ColumnDefault::Text(s) => Value::Text(s.clone()),
            };
            defaults.push((Ident::new(column)?, value));
        }

        Ok(Self {
            name: config.name.clone(),
            parent_table: Ident::new(&config.parent_table)?,
            parent_key: Ident::new(&config.parent_key)?,
            table: Ident::new(&config.table)?,
            id_column: Ident::new(&config.id_column)?,
            parent_column: Ident::new(&config.parent_column)?,
            counter_key: config.counter_key.clone(),
            defaults,
            deregister: config.deregister_after_success,
        })
    }

    /// Parent keys with no dependent row, ascending
    async fn scan(&self, session: &Session) -> Result<Vec<Value>, StoreError> {
        let b = session.builder();
        let parent_key = b.column(Some("p"), &self.parent_key);

        let mut stmt = b.statement();
        stmt.push_sql("SELECT ")
            .push_sql(&parent_key)
            .push_sql(" FROM ")
            .push_sql(&b.table(&self.parent_table))
            .push_sql(" p WHERE ")
            .push_sql(&parent_key)
            .push_sql(" IS NOT NULL AND NOT EXISTS (SELECT 1 FROM ")
            .push_sql(&b.table(&self.table))
            .push_sql(" d WHERE ")
            .push_sql(&b.column(Some("d"), &self.parent_column))
            .push_sql(" = ")
            .push_sql(&parent_key)
            .push_sql(") ORDER BY 1");

        let rows = session.query(&stmt).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_values().into_iter().next())
            .collect())
    }

    async fn insert(&self, session: &Session, id: i64, parent: &Value) -> Result<u64, StoreError> {
        let b = session.builder();
        let mut columns = vec![b.column(None, &self.id_column), b.column(None, &self.parent_column)];
        columns.extend(self.defaults.iter().map(|(c, _)| b.column(None, c)));

        let mut stmt = b.statement();
        stmt.push_sql("INSERT INTO ")
            .push_sql(&b.table(&self.table))
            .push_sql(" (")
            .push_sql(&columns.join(", "))
            .push_sql(") VALUES (")
            .push_param(id)
            .push_sql(", ")
            .push_param(parent.clone());
        for (_, value) in &self.defaults {
            stmt.push_sql(", ").push_param(value.clone());
        }
        stmt.push_sql(")");
        session.execute(&stmt).await
    }
}

#[async_trait::async_trait]
impl RepairModule for MissingDependentsModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fix(&self, ctx: &mut RunContext<'_>) -> Result<(), ModuleError> {
        let session = ctx.session();
        let missing = self.scan(session).await?;

        if missing.is_empty() {
            ctx.log().info(format!(
                "Every {} row has its {} row",
                self.parent_table, self.table
            ));
            return Ok(());
        }

        if ctx.preview() {
            for parent in &missing {
                ctx.log().preview_for(
                    parent.to_string(),
                    format!("Would create missing {} row for {} {}", self.table, self.parent_table, parent),
                );
            }
            return Ok(());
        }

        let mut block = IdBlock::for_run(ctx, self.counter_key.as_str());
        let mut created = Vec::new();
        let mut outcome = Ok(());
        for parent in &missing {
            if let Err(e) = ctx.check_cancelled() {
                outcome = Err(e);
                break;
            }
            let id = match block.next_id(session, false).await {
                Ok(id) => id,
                Err(e) => {
                    outcome = Err(e.into());
                    break;
                }
            };
            match self.insert(session, id, parent).await {
                Ok(_) => created.push(parent.to_string()),
                Err(e) => {
                    outcome = Err(e.into());
                    break;
                }
            }
        }

        if !created.is_empty() {
            let mut message = format!("Created {} missing {} rows for:", created.len(), self.table);
            for line in format_id_batches(&created) {
                message.push('\n');
                message.push_str(&line);
            }
            ctx.log().success(message);
        }
        outcome
    }

    fn should_deregister_after_success(&self) -> bool {
        self.deregister
    }
}

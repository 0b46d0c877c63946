//! Counter synchronisation
//!
//! A counter that lags behind the largest id already present in the tables
//! it feeds will hand out ids that collide. This module raises the counter
//! to that maximum, and seeds a missing counter row so the allocator stops
//! failing with a missing key. Counters are only ever moved upward.

use dbmend_core::CounterSyncConfig;
use dbmend_engine::{ColumnRef, IdBlockAllocator, ModuleError, RepairModule, RuleError, RunContext};
use dbmend_store::{ForcedCommit, Session, StoreError};

pub struct CounterSyncModule {
    name: String,
    key: String,
    sources: Vec<ColumnRef>,
    deregister: bool,
}

impl CounterSyncModule {
    pub fn from_config(config: &CounterSyncConfig) -> Result<Self, RuleError> {
        let sources = config
            .sources
            .iter()
            .map(ColumnRef::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        if sources.is_empty() {
            return Err(RuleError::Shape {
                table: config.key.clone(),
                reason: "counter sync needs at least one source column".to_string(),
            });
        }
        Ok(Self {
            name: config.name.clone(),
            key: config.key.clone(),
            sources,
            deregister: config.deregister_after_success,
        })
    }

    /// Largest id in any source column
    async fn max_issued(&self, session: &Session) -> Result<Option<i64>, StoreError> {
        let b = session.builder();
        let mut max = None;
        for source in &self.sources {
            let mut stmt = b.statement();
            stmt.push_sql("SELECT MAX(")
                .push_sql(&b.column(None, &source.column))
                .push_sql(") FROM ")
                .push_sql(&b.table(&source.table));
            let value = match session.query(&stmt).await?.first() {
                Some(row) => row.opt_int(0)?,
                None => None,
            };
            max = max.max(value);
        }
        Ok(max)
    }

    async fn raise(&self, session: &Session, allocator: &IdBlockAllocator, target: i64) -> Result<u64, StoreError> {
        let counters = allocator.counters();
        let b = session.builder();
        let value = b.column(None, &counters.value_column);

        let mut stmt = b.statement();
        stmt.push_sql("UPDATE ")
            .push_sql(&b.table(&counters.table))
            .push_sql(" SET ")
            .push_sql(&value)
            .push_sql(" = ")
            .push_param(target)
            .push_sql(" WHERE ")
            .push_sql(&b.column(None, &counters.key_column))
            .push_sql(" = ")
            .push_param(self.key.as_str())
            .push_sql(" AND ")
            .push_sql(&value)
            .push_sql(" < ")
            .push_param(target);

        let forced = ForcedCommit::enter(session).await?;
        let result = forced.session().execute(&stmt).await;
        forced.restore().await?;
        result
    }

    async fn seed(&self, session: &Session, allocator: &IdBlockAllocator, value: i64) -> Result<u64, StoreError> {
        let counters = allocator.counters();
        let b = session.builder();

        let mut stmt = b.statement();
        stmt.push_sql("INSERT INTO ")
            .push_sql(&b.table(&counters.table))
            .push_sql(" (")
            .push_sql(&b.column(None, &counters.key_column))
            .push_sql(", ")
            .push_sql(&b.column(None, &counters.value_column))
            .push_sql(") VALUES (")
            .push_param(self.key.as_str())
            .push_sql(", ")
            .push_param(value)
            .push_sql(")");

        let forced = ForcedCommit::enter(session).await?;
        let result = forced.session().execute(&stmt).await;
        forced.restore().await?;
        result
    }
}

#[async_trait::async_trait]
impl RepairModule for CounterSyncModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fix(&self, ctx: &mut RunContext<'_>) -> Result<(), ModuleError> {
        let session = ctx.session();
        let allocator = IdBlockAllocator::new(ctx.settings().counters.clone());

        let issued = self.max_issued(session).await?;
        let current = allocator.current_value(session, &self.key).await?;

        match (current, issued) {
            (Some(current), Some(issued)) if current < issued => {
                if ctx.preview() {
                    ctx.log().preview_for(
                        self.key.as_str(),
                        format!("Would raise counter {} from {} to {}", self.key, current, issued),
                    );
                } else if self.raise(session, &allocator, issued).await? > 0 {
                    ctx.log().success_for(
                        self.key.as_str(),
                        format!("Raised counter {} from {} to {}", self.key, current, issued),
                    );
                } else {
                    ctx.log().info(format!("Counter {} was raised concurrently", self.key));
                }
            }
            (Some(current), _) => {
                ctx.log().info(format!("Counter {} at {} is ahead of every issued id", self.key, current));
            }
            (None, issued) => {
                let value = issued.unwrap_or(0);
                if ctx.preview() {
                    ctx.log().preview_for(
                        self.key.as_str(),
                        format!("Would create missing counter {} at {}", self.key, value),
                    );
                } else {
                    self.seed(session, &allocator, value).await?;
                    ctx.log().success_for(
                        self.key.as_str(),
                        format!("Created missing counter {} at {}", self.key, value),
                    );
                }
            }
        }
        Ok(())
    }

    fn should_deregister_after_success(&self) -> bool {
        self.deregister
    }
}

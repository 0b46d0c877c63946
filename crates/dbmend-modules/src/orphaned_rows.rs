//! Orphaned row removal

use dbmend_core::OrphanedRowsConfig;
use dbmend_engine::{
    Cascade, ColumnRef, Failsafe, JoinColumn, ModuleError, ReferentialRepair, ReferentialRule,
    RepairModule, RuleError, RunContext,
};
use dbmend_store::Ident;

/// Deletes (or nullifies) rows whose join columns point at missing rows
pub struct OrphanedRowsModule {
    name: String,
    repair: ReferentialRepair,
    deregister: bool,
}

impl OrphanedRowsModule {
    pub fn new(name: impl Into<String>, repair: ReferentialRepair) -> Self {
        Self {
            name: name.into(),
            repair,
            deregister: false,
        }
    }

    pub fn from_config(config: &OrphanedRowsConfig, failsafe_ratio: f64) -> Result<Self, RuleError> {
        let table = Ident::new(&config.table)?;
        let id_column = config.id_column.as_deref().map(Ident::new).transpose()?;

        let mut joins = Vec::with_capacity(config.joins.len());
        for join in &config.joins {
            let targets = join
                .references
                .iter()
                .map(ColumnRef::from_config)
                .collect::<Result<Vec<_>, _>>()?;
            joins.push(JoinColumn::new(Ident::new(&join.column)?, targets));
        }

        let cascades = config
            .cascades
            .iter()
            .map(Cascade::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        let failsafe = if config.failsafe {
            let population = match &config.population_table {
                Some(t) => Ident::new(t)?,
                None => table.clone(),
            };
            Some(Failsafe::new(failsafe_ratio, population))
        } else {
            None
        };

        let rule = ReferentialRule::new(table, id_column, joins)?;
        let repair = ReferentialRepair::new(rule)
            .with_cascades(cascades)
            .with_action(config.action.into())
            .with_failsafe(failsafe);

        Ok(Self {
            name: config.name.clone(),
            repair,
            deregister: config.deregister_after_success,
        })
    }
}

#[async_trait::async_trait]
impl RepairModule for OrphanedRowsModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fix(&self, ctx: &mut RunContext<'_>) -> Result<(), ModuleError> {
        self.repair.run(ctx).await.map(|_| ())
    }

    fn should_deregister_after_success(&self) -> bool {
        self.deregister
    }
}

//! Duplicate logical key merging

use dbmend_core::DuplicateKeysConfig;
use dbmend_engine::{
    Cascade, ColumnRef, DuplicateRule, Failsafe, KeyColumn, ModuleError, RepairModule, RuleError, RunContext,
};
use dbmend_store::Ident;

/// Merges rows that share a logical key into one survivor
pub struct DuplicateKeysModule {
    name: String,
    rule: DuplicateRule,
    deregister: bool,
}

impl DuplicateKeysModule {
    pub fn from_config(config: &DuplicateKeysConfig, failsafe_ratio: f64) -> Result<Self, RuleError> {
        let table = Ident::new(&config.table)?;
        let keys = config
            .key_columns
            .iter()
            .map(|c| Ident::new(c).map(KeyColumn::plain))
            .collect::<Result<Vec<_>, _>>()?;
        let references = config
            .references
            .iter()
            .map(ColumnRef::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let cascades = config
            .cascades
            .iter()
            .map(Cascade::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let failsafe = config
            .failsafe
            .then(|| Failsafe::new(failsafe_ratio, table.clone()));

        let rule = DuplicateRule::new(table, Ident::new(&config.id_column)?, keys)?
            .with_references(references)
            .with_cascades(cascades)
            .with_survivor(config.survivor.into())
            .with_failsafe(failsafe);

        Ok(Self {
            name: config.name.clone(),
            rule,
            deregister: config.deregister_after_success,
        })
    }
}

#[async_trait::async_trait]
impl RepairModule for DuplicateKeysModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fix(&self, ctx: &mut RunContext<'_>) -> Result<(), ModuleError> {
        self.rule.run(ctx).await.map(|_| ())
    }

    fn should_deregister_after_success(&self) -> bool {
        self.deregister
    }
}

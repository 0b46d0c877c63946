//! Packed identifier unpacking followed by duplicate merging
//!
//! Unpacking can make two rows identical on their logical key (the same
//! node referenced once correctly and once with a type tag). The merge pass
//! always runs after the unpack pass and compares the packed column in its
//! unpacked form, so a preview reports the merges the commit run will make.

use dbmend_core::PackedIdentifiersConfig;
use dbmend_engine::{
    Cascade, ColumnRef, DuplicateRule, Failsafe, KeyColumn, ModuleError, PackedColumn, RepairModule, RuleError,
    RunContext,
};
use dbmend_store::Ident;

pub struct PackedIdentifiersModule {
    name: String,
    packed: PackedColumn,
    merge: Option<DuplicateRule>,
    deregister: bool,
}

impl PackedIdentifiersModule {
    pub fn from_config(config: &PackedIdentifiersConfig, failsafe_ratio: f64) -> Result<Self, RuleError> {
        let table = Ident::new(&config.table)?;
        let id_column = Ident::new(&config.id_column)?;
        let column = Ident::new(&config.column)?;

        let merge = if config.key_columns.is_empty() {
            None
        } else {
            let keys = config
                .key_columns
                .iter()
                .map(|c| {
                    Ident::new(c).map(|ident| {
                        if ident == column {
                            KeyColumn::unpacked(ident)
                        } else {
                            KeyColumn::plain(ident)
                        }
                    })
                })
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

            Some(
                DuplicateRule::new(table.clone(), id_column.clone(), keys)?
                    .with_references(references)
                    .with_cascades(cascades)
                    .with_survivor(config.survivor.into())
                    .with_failsafe(Some(Failsafe::new(failsafe_ratio, table.clone()))),
            )
        };

        Ok(Self {
            name: config.name.clone(),
            packed: PackedColumn::new(table, Some(id_column), column),
            merge,
            deregister: config.deregister_after_success,
        })
    }
}

#[async_trait::async_trait]
impl RepairModule for PackedIdentifiersModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fix(&self, ctx: &mut RunContext<'_>) -> Result<(), ModuleError> {
        self.packed.run(ctx).await?;
        if let Some(merge) = &self.merge {
            merge.run(ctx).await?;
        }
        Ok(())
    }

    fn should_deregister_after_success(&self) -> bool {
        self.deregister
    }
}

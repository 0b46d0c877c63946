//! Building modules from configuration

use crate::{
    CounterSyncModule, DuplicateKeysModule, MissingDependentsModule, OrphanedRowsModule, PackedIdentifiersModule,
};
use dbmend_core::{Config, ModuleConfig, RunConfig};
use dbmend_engine::{RepairModule, RuleError};

/// Build one module from its `[[modules]]` entry
pub fn build_module(config: &ModuleConfig, run: &RunConfig) -> Result<Box<dyn RepairModule>, RuleError> {
    let module: Box<dyn RepairModule> = match config {
        ModuleConfig::OrphanedRows(c) => Box::new(OrphanedRowsModule::from_config(c, run.failsafe_ratio)?),
        ModuleConfig::PackedIdentifiers(c) => {
            Box::new(PackedIdentifiersModule::from_config(c, run.failsafe_ratio)?)
        }
        ModuleConfig::DuplicateKeys(c) => Box::new(DuplicateKeysModule::from_config(c, run.failsafe_ratio)?),
        ModuleConfig::CounterSync(c) => Box::new(CounterSyncModule::from_config(c)?),
        ModuleConfig::MissingDependents(c) => Box::new(MissingDependentsModule::from_config(c)?),
    };
    tracing::debug!(module = config.name(), kind = config.kind(), "built module");
    Ok(module)
}

/// Build every declared module, in declaration order
pub fn build_modules(config: &Config) -> Result<Vec<Box<dyn RepairModule>>, RuleError> {
    config
        .modules
        .iter()
        .map(|m| build_module(m, &config.run))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[[modules]]
kind = "orphaned_rows"
name = "orphaned-relationships"
table = "relationships"
id_column = "id"
joins = [
    { column = "from_id", references = [{ table = "nodes", column = "id" }] },
]

[[modules]]
kind = "counter_sync"
name = "node-counter"
key = "node"
sources = [{ table = "nodes", column = "id" }]
"#;

    #[test]
    fn builds_in_declared_order() {
        let config = Config::from_toml(CONFIG).unwrap();
        let modules = build_modules(&config).unwrap();
        let names: Vec<&str> = modules.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["orphaned-relationships", "node-counter"]);
    }

    #[test]
    fn rejects_bad_identifiers() {
        let config = Config::from_toml(&CONFIG.replace("\"relationships\"", "\"rel; DROP\"")).unwrap();
        assert!(matches!(build_modules(&config), Err(RuleError::Ident(_))));
    }
}

//! Configuration schema (dbmend.toml)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Environment variable consulted when `[store].url` is omitted
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Store driver family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// SQLite (bundled)
    #[default]
    Sqlite,

    /// PostgreSQL (requires the `postgres` feature)
    Postgres,
}

/// Connection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub driver: DriverKind,

    /// Connection URL; falls back to `DATABASE_URL`
    #[serde(default)]
    pub url: Option<String>,

    /// Schema used to qualify table names
    #[serde(default)]
    pub schema: Option<String>,

    /// Catalog (database) name, informational
    #[serde(default)]
    pub catalog: Option<String>,
}

impl StoreConfig {
    /// Resolve the connection URL from the config or the environment
    pub fn resolved_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        std::env::var(DATABASE_URL_ENV).map_err(|_| {
            ConfigError::Invalid(format!(
                "no [store].url configured and {} is not set",
                DATABASE_URL_ENV
            ))
        })
    }
}

/// Run-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Per-statement timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub statement_timeout_secs: u64,

    /// Largest fraction of a population a module may delete in one run
    #[serde(default = "default_failsafe_ratio")]
    pub failsafe_ratio: f64,

    /// Number of identifiers reserved per allocator round-trip
    #[serde(default = "default_block_size")]
    pub id_block_size: u32,

    /// Where deregistered module names are persisted
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_failsafe_ratio() -> f64 {
    0.5
}

fn default_block_size() -> u32 {
    20
}

fn default_registry_path() -> PathBuf {
    PathBuf::from(".dbmend/registry.json")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            statement_timeout_secs: default_timeout_secs(),
            failsafe_ratio: default_failsafe_ratio(),
            id_block_size: default_block_size(),
            registry_path: default_registry_path(),
        }
    }
}

/// Shared counter table descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterTableConfig {
    #[serde(default = "default_counter_table")]
    pub table: String,

    #[serde(default = "default_counter_key")]
    pub key_column: String,

    #[serde(default = "default_counter_value")]
    pub value_column: String,
}

fn default_counter_table() -> String {
    "id_counters".to_string()
}

fn default_counter_key() -> String {
    "counter_key".to_string()
}

fn default_counter_value() -> String {
    "counter_value".to_string()
}

impl Default for CounterTableConfig {
    fn default() -> Self {
        Self {
            table: default_counter_table(),
            key_column: default_counter_key(),
            value_column: default_counter_value(),
        }
    }
}

/// A `table.column` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTarget {
    pub table: String,
    pub column: String,
}

/// One foreign-key-shaped column and the column(s) it may point into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinConfig {
    pub column: String,

    /// A value is valid if found in any of these
    pub references: Vec<ColumnTarget>,
}

/// Child rows deleted before their parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Child table
    pub table: String,

    /// Child column holding the parent key
    pub column: String,

    /// Parent column the child column refers to
    pub parent_column: String,
}

/// What to do with an orphaned row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanActionConfig {
    #[default]
    Delete,
    Nullify,
}

/// Which duplicate survives a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurvivorConfig {
    #[default]
    LowestId,
    FirstEncountered,
}

/// Literal value for an inserted column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnDefault {
    Int(i64),
    Text(String),
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedRowsConfig {
    pub name: String,
    pub table: String,

    /// Row identity used for reporting and keyed deletes
    #[serde(default)]
    pub id_column: Option<String>,

    pub joins: Vec<JoinConfig>,

    #[serde(default)]
    pub cascades: Vec<CascadeConfig>,

    #[serde(default)]
    pub action: OrphanActionConfig,

    #[serde(default = "default_true")]
    pub failsafe: bool,

    /// Table whose row count is the failsafe population (defaults to `table`)
    #[serde(default)]
    pub population_table: Option<String>,

    #[serde(default)]
    pub deregister_after_success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedIdentifiersConfig {
    pub name: String,
    pub table: String,
    pub id_column: String,

    /// Column that may carry a type discriminant in its upper 32 bits
    pub column: String,

    /// Logical key for the duplicate merge that follows the unpack pass
    #[serde(default)]
    pub key_columns: Vec<String>,

    #[serde(default)]
    pub references: Vec<ColumnTarget>,

    #[serde(default)]
    pub cascades: Vec<CascadeConfig>,

    #[serde(default)]
    pub survivor: SurvivorConfig,

    #[serde(default)]
    pub deregister_after_success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateKeysConfig {
    pub name: String,
    pub table: String,
    pub id_column: String,
    pub key_columns: Vec<String>,

    /// Columns elsewhere that point at `table.id_column` and get repointed
    #[serde(default)]
    pub references: Vec<ColumnTarget>,

    #[serde(default)]
    pub cascades: Vec<CascadeConfig>,

    #[serde(default)]
    pub survivor: SurvivorConfig,

    #[serde(default = "default_true")]
    pub failsafe: bool,

    #[serde(default)]
    pub deregister_after_success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSyncConfig {
    pub name: String,

    /// Counter key in the counter table
    pub key: String,

    /// Id columns whose values this counter issues
    pub sources: Vec<ColumnTarget>,

    #[serde(default)]
    pub deregister_after_success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingDependentsConfig {
    pub name: String,
    pub parent_table: String,
    pub parent_key: String,

    /// Dependent table receiving the new rows
    pub table: String,
    pub id_column: String,

    /// Dependent column pointing at `parent_table.parent_key`
    pub parent_column: String,

    /// Counter key the new ids are allocated from
    pub counter_key: String,

    /// Fixed values for the remaining columns
    #[serde(default)]
    pub defaults: BTreeMap<String, ColumnDefault>,

    #[serde(default)]
    pub deregister_after_success: bool,
}

/// One declared repair module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleConfig {
    OrphanedRows(OrphanedRowsConfig),
    PackedIdentifiers(PackedIdentifiersConfig),
    DuplicateKeys(DuplicateKeysConfig),
    CounterSync(CounterSyncConfig),
    MissingDependents(MissingDependentsConfig),
}

impl ModuleConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::OrphanedRows(c) => &c.name,
            Self::PackedIdentifiers(c) => &c.name,
            Self::DuplicateKeys(c) => &c.name,
            Self::CounterSync(c) => &c.name,
            Self::MissingDependents(c) => &c.name,
        }
    }

    /// Stable kind identifier as written in the config file
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrphanedRows(_) => "orphaned_rows",
            Self::PackedIdentifiers(_) => "packed_identifiers",
            Self::DuplicateKeys(_) => "duplicate_keys",
            Self::CounterSync(_) => "counter_sync",
            Self::MissingDependents(_) => "missing_dependents",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(format!("module '{}': {}", self.name(), msg)));

        match self {
            Self::OrphanedRows(c) => {
                if c.joins.is_empty() || c.joins.len() > 3 {
                    return invalid(format!("expected 1 to 3 joins, found {}", c.joins.len()));
                }
                for join in &c.joins {
                    if join.references.is_empty() || join.references.len() > 3 {
                        return invalid(format!(
                            "join on '{}' needs 1 to 3 references, found {}",
                            join.column,
                            join.references.len()
                        ));
                    }
                }
                if c.action == OrphanActionConfig::Nullify && !c.cascades.is_empty() {
                    return invalid("cascades are only valid with action = \"delete\"".to_string());
                }
            }
            Self::PackedIdentifiers(c) => {
                if c.key_columns.is_empty() && !c.references.is_empty() {
                    return invalid("references require key_columns for the duplicate merge".to_string());
                }
            }
            Self::DuplicateKeys(c) => {
                if c.key_columns.is_empty() {
                    return invalid("key_columns must not be empty".to_string());
                }
            }
            Self::CounterSync(c) => {
                if c.sources.is_empty() {
                    return invalid("sources must not be empty".to_string());
                }
            }
            Self::MissingDependents(_) => {}
        }
        Ok(())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub counters: CounterTableConfig,

    /// Modules in run order
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl Config {
    /// Load and validate config from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        Self::from_toml(&contents)
    }

    /// Load and validate config from a TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.run.failsafe_ratio > 0.0 && self.run.failsafe_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "run.failsafe_ratio must be in (0, 1], found {}",
                self.run.failsafe_ratio
            )));
        }
        if self.run.id_block_size == 0 {
            return Err(ConfigError::Invalid("run.id_block_size must be positive".to_string()));
        }
        if self.run.statement_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "run.statement_timeout_secs must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for module in &self.modules {
            if module.name().trim().is_empty() {
                return Err(ConfigError::Invalid("module names must not be empty".to_string()));
            }
            if !seen.insert(module.name()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate module name '{}'",
                    module.name()
                )));
            }
            module.validate()?;
        }
        Ok(())
    }

    pub fn statement_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.run.statement_timeout_secs)
    }

    /// Declared modules whose name matches any filter, in declared order
    ///
    /// An empty filter list selects every module.
    pub fn select_modules(&self, filters: &[String]) -> Vec<&ModuleConfig> {
        self.modules
            .iter()
            .filter(|m| filters.is_empty() || matches_pattern(m.name(), filters))
            .collect()
    }
}

/// Check if a name matches any pattern in the list
pub fn matches_pattern(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if pattern.contains('*') {
            glob_match(pattern, name)
        } else {
            pattern == name
        }
    })
}

/// Simple glob matching (supports a single *)
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(star_pos) = pattern.find('*') {
        let prefix = &pattern[..star_pos];
        let suffix = &pattern[star_pos + 1..];

        text.len() >= prefix.len() + suffix.len()
            && text.starts_with(prefix)
            && text.ends_with(suffix)
    } else {
        pattern == text
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[store]
driver = "sqlite"
url = "sqlite://repair.db"

[run]
failsafe_ratio = 0.25

[[modules]]
kind = "orphaned_rows"
name = "Orphaned relationships"
table = "relationships"
id_column = "id"

[[modules.joins]]
column = "source_id"
references = [{ table = "nodes", column = "id" }, { table = "archived_nodes", column = "id" }]

[[modules.cascades]]
table = "relationship_props"
column = "relationship_id"
parent_column = "id"

[[modules]]
kind = "counter_sync"
name = "Node counter"
key = "node"
sources = [{ table = "nodes", column = "id" }]

[[modules]]
kind = "missing_dependents"
name = "Node ACLs"
parent_table = "nodes"
parent_key = "id"
table = "acls"
id_column = "id"
parent_column = "node_id"
counter_key = "acl"
defaults = { inherits = 1, owner = "system" }
"#;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.store.driver, DriverKind::Sqlite);
        assert_eq!(config.run.failsafe_ratio, 0.5);
        assert_eq!(config.run.id_block_size, 20);
        assert_eq!(config.counters.table, "id_counters");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_modules() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.run.failsafe_ratio, 0.25);
        assert_eq!(config.run.statement_timeout_secs, 30);
        assert_eq!(config.modules.len(), 3);

        let ModuleConfig::OrphanedRows(orphans) = &config.modules[0] else {
            panic!("expected orphaned_rows module");
        };
        assert_eq!(orphans.joins[0].references.len(), 2);
        assert_eq!(orphans.cascades[0].table, "relationship_props");
        assert_eq!(orphans.action, OrphanActionConfig::Delete);
        assert!(orphans.failsafe);

        assert_eq!(config.modules[1].kind(), "counter_sync");

        let ModuleConfig::MissingDependents(acls) = &config.modules[2] else {
            panic!("expected missing_dependents module");
        };
        assert_eq!(acls.defaults.get("inherits"), Some(&ColumnDefault::Int(1)));
        assert_eq!(
            acls.defaults.get("owner"),
            Some(&ColumnDefault::Text("system".to_string()))
        );
    }

    #[test]
    fn rejects_duplicate_names() {
        let toml = r#"
[[modules]]
kind = "counter_sync"
name = "Same"
key = "a"
sources = [{ table = "t", column = "id" }]

[[modules]]
kind = "counter_sync"
name = "Same"
key = "b"
sources = [{ table = "t", column = "id" }]
"#;
        assert!(matches!(Config::from_toml(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_too_many_joins() {
        let toml = r#"
[[modules]]
kind = "orphaned_rows"
name = "Wide"
table = "t"
joins = [
  { column = "a", references = [{ table = "x", column = "id" }] },
  { column = "b", references = [{ table = "x", column = "id" }] },
  { column = "c", references = [{ table = "x", column = "id" }] },
  { column = "d", references = [{ table = "x", column = "id" }] },
]
"#;
        assert!(matches!(Config::from_toml(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_bad_ratio() {
        let mut config = Config::default();
        config.run.failsafe_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn module_selection() {
        let config = Config::from_toml(SAMPLE).unwrap();

        assert_eq!(config.select_modules(&[]).len(), 3);

        let selected = config.select_modules(&["Node*".to_string()]);
        let names: Vec<&str> = selected.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["Node counter", "Node ACLs"]);
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let toml = toml::to_string(&config).unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("Orphan*", "Orphaned rows"));
        assert!(glob_match("*counter", "node counter"));
        assert!(!glob_match("ab*ba", "aba"));
    }
}

//! dbmend core
//!
//! Core data model with stable, versioned types: repair outcomes, the per-run
//! result log, the aggregate report and the `dbmend.toml` configuration.
//! Never rename status names - they are part of the report format.

pub mod outcome;
pub mod log;
pub mod report;
pub mod config;

pub use outcome::{RepairOutcome, Status};
pub use log::{format_id_batches, ResultLog};
pub use report::{ModuleReport, Report, ReportVersion, ReportSummary, RunMode};
pub use config::{
    matches_pattern, CascadeConfig, ColumnDefault, ColumnTarget, Config, ConfigError,
    CounterSyncConfig, CounterTableConfig, DriverKind, DuplicateKeysConfig, JoinConfig,
    MissingDependentsConfig, ModuleConfig, OrphanActionConfig, OrphanedRowsConfig,
    PackedIdentifiersConfig, RunConfig, StoreConfig, SurvivorConfig,
};

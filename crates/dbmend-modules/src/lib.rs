//! dbmend modules - concrete repair modules
//!
//! Each module wraps one engine pattern with its configuration:
//!
//! | kind                 | repairs                                          |
//! |----------------------|--------------------------------------------------|
//! | `orphaned_rows`      | rows whose foreign keys point at nothing         |
//! | `packed_identifiers` | ids with a type tag in the upper 32 bits         |
//! | `duplicate_keys`     | rows sharing a logical key                       |
//! | `counter_sync`       | counters that lag behind the ids already issued  |
//! | `missing_dependents` | parents missing their mandatory dependent row    |
//!
//! [`catalog::build_modules`] turns the `[[modules]]` section of
//! `dbmend.toml` into runnable modules, in declared order.

pub mod orphaned_rows;
pub mod packed_identifiers;
pub mod duplicate_keys;
pub mod counter_sync;
pub mod missing_dependents;
pub mod catalog;

pub use orphaned_rows::OrphanedRowsModule;
pub use packed_identifiers::PackedIdentifiersModule;
pub use duplicate_keys::DuplicateKeysModule;
pub use counter_sync::CounterSyncModule;
pub use missing_dependents::MissingDependentsModule;
pub use catalog::{build_module, build_modules};

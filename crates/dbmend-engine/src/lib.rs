//! dbmend engine - repair patterns and orchestration
//!
//! This crate implements the machinery every repair module is built from:
//! - The `RepairModule` contract and its per-run context
//! - Identifier block allocation from the shared counter table
//! - Referential scanning and repair, with child cascades
//! - Packed identifier unpacking and duplicate-key merging
//! - The failsafe threshold
//! - The orchestrator that runs modules in declared order

pub mod module;
pub mod allocator;
pub mod cascade;
pub mod referential;
pub mod packed;
pub mod duplicates;
pub mod failsafe;
pub mod registry;
pub mod orchestrator;

pub use module::{ModuleError, RepairModule, RunContext, RunSettings};
pub use allocator::{AllocError, CounterTable, IdBlock, IdBlockAllocator};
pub use cascade::Cascade;
pub use referential::{ColumnRef, JoinColumn, OrphanAction, OrphanCandidate, ReferentialRepair, ReferentialRule, RuleError};
pub use packed::{PackedColumn, PackedValue};
pub use duplicates::{DuplicateGroup, DuplicateRule, KeyColumn, SurvivorPolicy};
pub use failsafe::{Failsafe, FailsafeVerdict};
pub use registry::{FileRegistry, MemoryRegistry, ModuleRegistry, RegistryError};
pub use orchestrator::{Orchestrator, ReportSink, RunState};

//! The repair module contract
//!
//! A repair module owns one detection query and one repair action. The
//! orchestrator hands each module a fresh [`RunContext`] holding the
//! module's own session, an empty result log, the run mode, and the
//! cancellation token. Modules report everything through the log; the only
//! errors they return are ones that end their run early.

use crate::allocator::{AllocError, CounterTable};
use dbmend_core::{Config, ResultLog};
use dbmend_store::{Session, StoreError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that abort a module run
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Counter key '{0}' is missing from the counter table")]
    MissingCounterKey(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl From<AllocError> for ModuleError {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::MissingCounterKey(key) => Self::MissingCounterKey(key),
            AllocError::InvalidCount(count) => {
                Self::Precondition(format!("cannot allocate {} identifiers", count))
            }
            AllocError::Store(e) => Self::Store(e),
        }
    }
}

/// Run-wide settings shared by every module
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub failsafe_ratio: f64,
    pub id_block_size: u32,
    pub statement_timeout: Duration,
    pub counters: CounterTable,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        Ok(Self {
            failsafe_ratio: config.run.failsafe_ratio,
            id_block_size: config.run.id_block_size,
            statement_timeout: config.statement_timeout(),
            counters: CounterTable::from_config(&config.counters)?,
        })
    }
}

/// Everything one module invocation may touch
pub struct RunContext<'a> {
    preview: bool,
    session: &'a Session,
    settings: &'a RunSettings,
    log: ResultLog,
    cancel: CancellationToken,
    refused: bool,
}

impl<'a> RunContext<'a> {
    pub fn new(
        name: &str,
        preview: bool,
        session: &'a Session,
        settings: &'a RunSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            preview,
            session,
            settings,
            log: ResultLog::new(name),
            cancel,
            refused: false,
        }
    }

    /// True when the run must not mutate business data
    pub fn preview(&self) -> bool {
        self.preview
    }

    pub fn session(&self) -> &'a Session {
        self.session
    }

    pub fn settings(&self) -> &'a RunSettings {
        self.settings
    }

    pub fn log(&mut self) -> &mut ResultLog {
        &mut self.log
    }

    pub fn log_ref(&self) -> &ResultLog {
        &self.log
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Return `Cancelled` once the run has been asked to stop
    pub fn check_cancelled(&self) -> Result<(), ModuleError> {
        if self.cancel.is_cancelled() {
            Err(ModuleError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Record that a repair was withheld (e.g. by the failsafe)
    ///
    /// A run with a withheld repair is never a clean run, so the module is
    /// not deregistered after it.
    pub fn mark_refused(&mut self) {
        self.refused = true;
    }

    pub fn refused(&self) -> bool {
        self.refused
    }

    pub fn into_log(self) -> ResultLog {
        self.log
    }
}

/// A self-contained detect-and-repair unit
///
/// Implementations must be idempotent: once a commit run has repaired
/// everything, the next run finds nothing and records only `Info`.
#[async_trait::async_trait]
pub trait RepairModule: Send + Sync {
    /// Stable name, used in reports and the registry
    fn name(&self) -> &str;

    /// Detect problems and, unless previewing, repair them
    async fn fix(&self, ctx: &mut RunContext<'_>) -> Result<(), ModuleError>;

    /// Remove the module from future runs after a clean commit run
    fn should_deregister_after_success(&self) -> bool {
        false
    }
}

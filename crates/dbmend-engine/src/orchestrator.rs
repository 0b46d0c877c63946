//! Run orchestration
//!
//! The orchestrator runs registered modules strictly in declared order. Each
//! module gets its own connection and its own result log, so one module's
//! failure never touches another's outcomes:
//!
//! ```text
//! Idle -> Scanning(module) -> ... -> Reporting -> Idle
//!                  \-> Aborted(module) -> Scanning(next) ...
//! ```
//!
//! Errors a module returns become a `Failure` outcome naming the module; the
//! run continues with the next one. After a clean commit run, modules that
//! asked for it are removed from the registry.

use crate::module::{RepairModule, RunContext, RunSettings};
use crate::registry::ModuleRegistry;
use dbmend_core::matches_pattern;
use dbmend_core::{ModuleReport, Report, ResultLog, RunMode};
use dbmend_store::{ConnectionProvider, Session};
use tokio_util::sync::CancellationToken;

/// Publishes a finished report somewhere
pub trait ReportSink {
    fn publish(&mut self, report: &Report) -> Result<(), std::io::Error>;
}

/// Where the orchestrator is in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scanning(String),
    Reporting,
    Aborted(String),
}

/// What one module invocation left behind
struct Invocation {
    log: ResultLog,
    aborted: bool,
    /// A repair was withheld, so the run does not count as clean
    refused: bool,
}

pub struct Orchestrator {
    modules: Vec<Box<dyn RepairModule>>,
    provider: Box<dyn ConnectionProvider>,
    registry: Box<dyn ModuleRegistry>,
    settings: RunSettings,
    cancel: CancellationToken,
    history: Vec<RunState>,
}

impl Orchestrator {
    pub fn new(
        provider: Box<dyn ConnectionProvider>,
        registry: Box<dyn ModuleRegistry>,
        settings: RunSettings,
    ) -> Self {
        Self {
            modules: Vec::new(),
            provider,
            registry,
            settings,
            cancel: CancellationToken::new(),
            history: vec![RunState::Idle],
        }
    }

    /// Append a module; modules run in the order they are added
    pub fn with_module(mut self, module: Box<dyn RepairModule>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_modules(mut self, modules: Vec<Box<dyn RepairModule>>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Share an externally owned cancellation token (e.g. tied to Ctrl-C)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &dyn ModuleRegistry {
        self.registry.as_ref()
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Names of all modules, registered or not, in run order
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Names of the modules a run would invoke
    pub fn active_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .map(|m| m.name())
            .filter(|name| self.registry.is_registered(name))
            .collect()
    }

    pub fn state(&self) -> &RunState {
        self.history.last().unwrap_or(&RunState::Idle)
    }

    /// Every state the orchestrator has passed through
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    fn transition(&mut self, state: RunState) {
        tracing::debug!(?state, "orchestrator state");
        self.history.push(state);
    }

    /// Run every registered module
    pub async fn run(&mut self, preview: bool) -> Report {
        self.run_selected(preview, &[]).await
    }

    /// Run the registered modules whose names match any of `filters`
    ///
    /// An empty filter list selects every registered module.
    pub async fn run_selected(&mut self, preview: bool, filters: &[String]) -> Report {
        let mut report = Report::new(RunMode::from_preview(preview));
        report.metadata = Some(serde_json::json!({ "store": self.provider.describe() }));

        tracing::info!(
            mode = if preview { "preview" } else { "commit" },
            store = %self.provider.describe(),
            "starting repair run"
        );

        let selected: Vec<usize> = (0..self.modules.len())
            .filter(|&idx| {
                let name = self.modules[idx].name();
                self.registry.is_registered(name) && (filters.is_empty() || matches_pattern(name, filters))
            })
            .collect();

        for idx in selected {
            let name = self.modules[idx].name().to_string();

            if self.cancel.is_cancelled() {
                let mut log = ResultLog::new(name.as_str());
                log.warning("Skipped: run cancelled");
                report.add_module(ModuleReport::new(name, log.into_outcomes()));
                continue;
            }

            self.transition(RunState::Scanning(name.clone()));
            let Invocation {
                mut log,
                aborted,
                refused,
            } = self.invoke(idx, preview).await;
            if aborted {
                self.transition(RunState::Aborted(name.clone()));
            }

            let mut deregistered = false;
            let clean = !preview && !aborted && !refused && !log.has_failures();
            if clean && self.modules[idx].should_deregister_after_success() {
                match self.registry.deregister(&name) {
                    Ok(()) => {
                        deregistered = true;
                        log.info(format!("Module {} deregistered after a clean run", name));
                    }
                    Err(e) => log.warning(format!("Could not deregister {}: {}", name, e)),
                }
            }

            let mut module_report = ModuleReport::new(name, log.into_outcomes());
            module_report.aborted = aborted;
            module_report.deregistered = deregistered;
            report.add_module(module_report);
        }

        self.transition(RunState::Reporting);
        tracing::info!(
            modules = report.summary.modules_run,
            failures = report.summary.failures,
            "repair run finished"
        );
        self.transition(RunState::Idle);
        report
    }

    /// Run, then hand the report to every sink
    pub async fn run_and_publish(
        &mut self,
        preview: bool,
        filters: &[String],
        sinks: &mut [&mut dyn ReportSink],
    ) -> Result<Report, std::io::Error> {
        let report = self.run_selected(preview, filters).await;
        for sink in sinks.iter_mut() {
            sink.publish(&report)?;
        }
        Ok(report)
    }

    /// Run one module on a fresh connection
    async fn invoke(&self, idx: usize, preview: bool) -> Invocation {
        let module = self.modules[idx].as_ref();

        let store = match self.provider.connect().await {
            Ok(store) => store,
            Err(e) => {
                let mut log = ResultLog::new(module.name());
                log.failure(format!("{} aborted: could not open a connection: {}", module.name(), e));
                return Invocation {
                    log,
                    aborted: true,
                    refused: false,
                };
            }
        };
        let session = Session::new(store, self.settings.statement_timeout);

        let mut ctx = RunContext::new(module.name(), preview, &session, &self.settings, self.cancel.clone());
        let result = module.fix(&mut ctx).await;
        let refused = ctx.refused();
        let mut log = ctx.into_log();

        match result {
            Ok(()) => Invocation {
                log,
                aborted: false,
                refused,
            },
            Err(e) => {
                if let Err(rollback) = session.rollback().await {
                    tracing::warn!(module = module.name(), "rollback after abort failed: {}", rollback);
                }
                log.failure(format!("{} aborted: {}", module.name(), e));
                Invocation {
                    log,
                    aborted: true,
                    refused,
                }
            }
        }
    }
}

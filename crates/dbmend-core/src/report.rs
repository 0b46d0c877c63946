//! Report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use serde::{Deserialize, Serialize};
use crate::outcome::{RepairOutcome, Status};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Whether a run was allowed to mutate the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Detection only
    Preview,

    /// Detection and mutation
    Commit,
}

impl RunMode {
    pub fn from_preview(preview: bool) -> Self {
        if preview {
            Self::Preview
        } else {
            Self::Commit
        }
    }

    pub fn is_preview(&self) -> bool {
        matches!(self, Self::Preview)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preview => write!(f, "preview"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Per-status counts across the whole report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Total number of outcomes
    pub total: usize,

    pub info: usize,

    pub warnings: usize,

    pub previews: usize,

    pub successes: usize,

    pub failures: usize,

    /// Number of modules that ran (or were attempted)
    pub modules_run: usize,

    /// Number of modules whose run was aborted by an error
    pub modules_aborted: usize,
}

impl ReportSummary {
    fn count(&mut self, outcome: &RepairOutcome) {
        match outcome.status() {
            Status::Info => self.info += 1,
            Status::Warning => self.warnings += 1,
            Status::Preview => self.previews += 1,
            Status::Success => self.successes += 1,
            Status::Failure => self.failures += 1,
            Status::Debug => return,
        }
        self.total += 1;
    }
}

/// Outcomes of one module within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleReport {
    /// Module name
    pub name: String,

    /// Outcomes in the order the module produced them
    pub outcomes: Vec<RepairOutcome>,

    /// The module run ended with an error
    #[serde(default)]
    pub aborted: bool,

    /// The module was removed from future runs after this one
    #[serde(default)]
    pub deregistered: bool,
}

impl ModuleReport {
    pub fn new(name: impl Into<String>, outcomes: Vec<RepairOutcome>) -> Self {
        Self {
            name: name.into(),
            outcomes,
            aborted: false,
            deregistered: false,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.status() == Status::Failure)
    }
}

/// Aggregate repair report (report.json v1)
///
/// The sole observable artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (RFC 3339)
    pub timestamp: String,

    pub mode: RunMode,

    /// Summary statistics
    pub summary: ReportSummary,

    /// Module sections in run order
    pub modules: Vec<ModuleReport>,

    /// Metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Report {
    /// Create a new empty report
    pub fn new(mode: RunMode) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            mode,
            summary: ReportSummary::default(),
            modules: Vec::new(),
            metadata: None,
        }
    }

    /// Add a module section to the report
    pub fn add_module(&mut self, module: ModuleReport) {
        for outcome in &module.outcomes {
            self.summary.count(outcome);
        }
        self.summary.modules_run += 1;
        if module.aborted {
            self.summary.modules_aborted += 1;
        }
        self.modules.push(module);
    }

    /// All outcomes in run order
    pub fn outcomes(&self) -> impl Iterator<Item = &RepairOutcome> {
        self.modules.iter().flat_map(|m| m.outcomes.iter())
    }

    pub fn module(&self, name: &str) -> Option<&ModuleReport> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Check if the report has any failure outcome
    pub fn has_failures(&self) -> bool {
        self.summary.failures > 0
    }

    /// A run with only info and success entries is fully healthy
    pub fn is_healthy(&self) -> bool {
        self.summary.total == self.summary.info + self.summary.successes
    }

    /// Process exit code for this report: 0 without failures, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn outcome(status: Status) -> RepairOutcome {
        RepairOutcome::new(status, None, "Orphans", "message")
    }

    #[test]
    fn empty_report() {
        let report = Report::new(RunMode::Preview);
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert_eq!(report.summary.total, 0);
        assert!(!report.has_failures());
        assert!(report.is_healthy());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn report_with_modules() {
        let mut report = Report::new(RunMode::Commit);
        report.add_module(ModuleReport::new(
            "Orphans",
            vec![outcome(Status::Info), outcome(Status::Success)],
        ));

        let mut failed = ModuleReport::new("Counters", vec![outcome(Status::Failure)]);
        failed.aborted = true;
        report.add_module(failed);

        assert_eq!(
            report.summary,
            ReportSummary {
                total: 3,
                info: 1,
                warnings: 0,
                previews: 0,
                successes: 1,
                failures: 1,
                modules_run: 2,
                modules_aborted: 1,
            }
        );
        assert!(report.has_failures());
        assert!(!report.is_healthy());
        assert_eq!(report.exit_code(), 1);
        assert!(report.module("Counters").unwrap().has_failures());
        assert_eq!(report.outcomes().count(), 3);
    }

    #[test]
    fn warnings_are_not_healthy_but_exit_zero() {
        let mut report = Report::new(RunMode::Commit);
        report.add_module(ModuleReport::new("Orphans", vec![outcome(Status::Warning)]));
        assert!(!report.is_healthy());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn report_serialization() {
        let report = Report::new(RunMode::Preview);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"mode\": \"preview\""));
        assert!(json.contains("\"modules\""));
    }
}

//! Per-run result log
//!
//! A `ResultLog` is owned by one module run. It is append-only while the run
//! lasts and starts empty for the next run. Every record is mirrored to
//! `tracing`; debug records stop there and are never retained.

use crate::outcome::{RepairOutcome, Status};

/// Maximum number of ids rendered on one summary line
const IDS_PER_LINE: usize = 10;

/// Minimum width of a rendered id
const ID_WIDTH: usize = 6;

/// Ordered, append-only collection of outcomes for one module run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLog {
    operation: String,
    entries: Vec<RepairOutcome>,
}

impl ResultLog {
    /// Create an empty log for the named operation
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            entries: Vec::new(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Append an outcome
    ///
    /// `Debug` records are logged and dropped.
    pub fn record(&mut self, status: Status, subject_id: Option<String>, message: impl Into<String>) {
        let message = message.into();
        let subject = subject_id.as_deref().unwrap_or("-");

        match status {
            Status::Debug => {
                tracing::debug!(module = %self.operation, subject, "{}", message);
                return;
            }
            Status::Failure => tracing::error!(module = %self.operation, subject, "{}", message),
            Status::Warning => tracing::warn!(module = %self.operation, subject, "{}", message),
            _ => tracing::info!(module = %self.operation, subject, status = %status, "{}", message),
        }

        self.entries
            .push(RepairOutcome::new(status, subject_id, self.operation.clone(), message));
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(Status::Info, None, message);
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.record(Status::Debug, None, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.record(Status::Warning, None, message);
    }

    pub fn failure(&mut self, message: impl Into<String>) {
        self.record(Status::Failure, None, message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.record(Status::Success, None, message);
    }

    pub fn preview(&mut self, message: impl Into<String>) {
        self.record(Status::Preview, None, message);
    }

    /// Append a preview record about one affected entity
    pub fn preview_for(&mut self, subject_id: impl Into<String>, message: impl Into<String>) {
        self.record(Status::Preview, Some(subject_id.into()), message);
    }

    /// Append a success record about one affected entity
    pub fn success_for(&mut self, subject_id: impl Into<String>, message: impl Into<String>) {
        self.record(Status::Success, Some(subject_id.into()), message);
    }

    /// Append a warning about one affected entity
    pub fn warning_for(&mut self, subject_id: impl Into<String>, message: impl Into<String>) {
        self.record(Status::Warning, Some(subject_id.into()), message);
    }

    pub fn entries(&self) -> &[RepairOutcome] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| e.status() == Status::Failure)
    }

    /// Number of records that are neither informational nor debug
    pub fn actionable_count(&self) -> usize {
        self.entries.iter().filter(|e| e.status().is_actionable()).count()
    }

    /// Subject ids of all records with the given status, in log order
    pub fn subjects(&self, status: Status) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.status() == status)
            .filter_map(|e| e.subject_id())
            .collect()
    }

    /// Drop all records, ready for the next run
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn into_outcomes(self) -> Vec<RepairOutcome> {
        self.entries
    }
}

/// Render ids as summary lines of at most ten ids, each padded to six columns
///
/// Display convenience for long id lists in a single summary record.
pub fn format_id_batches<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    ids.chunks(IDS_PER_LINE)
        .map(|chunk| {
            chunk
                .iter()
                .map(|id| format!("{:>width$}", id.as_ref(), width = ID_WIDTH))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

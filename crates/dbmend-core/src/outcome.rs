//! Repair outcomes
//!
//! IMPORTANT: Status names are serialized into reports and are stable.
//! NEVER rename or remove a status - add new ones only.

use serde::{Deserialize, Serialize};

/// Outcome status of a single repair record
///
/// `Debug` exists so modules can emit trace-level detail through the same
/// call sites, but debug records are never retained in a result log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Informational message (including "no problems found")
    Info,

    /// Diagnostic detail, filtered at creation
    Debug,

    /// Something needs attention but nothing was changed
    Warning,

    /// Describes a mutation that a commit run would perform
    Preview,

    /// A mutation was performed
    Success,

    /// The module could not complete
    Failure,
}

impl Status {
    /// Get the status as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Warning => "WARNING",
            Self::Preview => "PREVIEW",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    /// Whether a record with this status indicates outstanding or changed data
    ///
    /// A healthy second run produces only non-actionable records.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Info | Self::Debug)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record per detected issue or summary statement
///
/// Fields are private so a record cannot change after it was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    status: Status,

    #[serde(skip_serializing_if = "Option::is_none")]
    subject_id: Option<String>,

    operation: String,

    message: String,
}

impl RepairOutcome {
    /// Create a new outcome
    pub fn new(
        status: Status,
        subject_id: Option<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            subject_id,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Identifier of the affected entity, absent for summary messages
    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    /// Human-readable name of the module that produced this outcome
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subject_id {
            Some(id) => write!(f, "[{}] {} ({}): {}", self.status, self.operation, id, self.message),
            None => write!(f, "[{}] {}: {}", self.status, self.operation, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_stability() {
        assert_eq!(Status::Preview.as_str(), "PREVIEW");
        assert_eq!(Status::Failure.as_str(), "FAILURE");
    }

    #[test]
    fn actionable_statuses() {
        assert!(!Status::Info.is_actionable());
        assert!(!Status::Debug.is_actionable());
        assert!(Status::Warning.is_actionable());
        assert!(Status::Success.is_actionable());
    }

    #[test]
    fn outcome_serialization() {
        let outcome = RepairOutcome::new(
            Status::Success,
            Some("42".to_string()),
            "Orphaned relationships",
            "Deleted relationship 42",
        );

        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"success\""));
        assert!(json.contains("\"subject_id\":\"42\""));

        let summary = RepairOutcome::new(Status::Info, None, "Orphaned relationships", "No problems found");
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("subject_id"));
    }

    #[test]
    fn display_includes_subject() {
        let outcome = RepairOutcome::new(Status::Preview, Some("7".into()), "Packed ids", "would unpack");
        assert_eq!(outcome.to_string(), "[PREVIEW] Packed ids (7): would unpack");
    }
}

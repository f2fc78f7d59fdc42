// Engine outcome models
//
// These are what the engine hands back to its caller (CLI or installer shell). Serializable
// views exist for the smoke transcript; the error itself is rendered as text.

use serde::Serialize;
use uuid::Uuid;

use crate::capability::AccountInfo;
use crate::error::InstallError;
use crate::installation::eligibility::{EligibilityReason, InstallPath};
use crate::journal::RollbackJournal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallSummary {
    pub attempt_id: Uuid,
    pub path: InstallPath,
    pub account: AccountInfo,
    pub created_user: bool,
    pub password_reset: bool,
    /// Services registered by this attempt (pre-existing ones are not listed).
    pub services_created: Vec<String>,
    pub symlink_created: bool,
    /// Every password this attempt handled has been zeroed.
    pub password_cleared: bool,
}

#[derive(Debug)]
pub enum InstallOutcome {
    Success(InstallSummary),
    Rejected(EligibilityReason),
    /// A step failed after eligibility; `journal` lists what must be undone.
    Failed {
        error: InstallError,
        journal: RollbackJournal,
    },
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InstallOutcome::Success(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            InstallOutcome::Success(_) => "success",
            InstallOutcome::Rejected(_) => "rejected",
            InstallOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoFailure {
    pub step: String,
    pub target: String,
    pub error: String,
}

impl UndoFailure {
    pub fn new(step: &str, target: impl Into<String>, error: impl ToString) -> Self {
        Self {
            step: step.to_string(),
            target: target.into(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RollbackOutcome {
    FullyUndone,
    PartiallyUndone { failures: Vec<UndoFailure> },
}

impl RollbackOutcome {
    pub fn from_failures(failures: Vec<UndoFailure>) -> Self {
        if failures.is_empty() {
            RollbackOutcome::FullyUndone
        } else {
            RollbackOutcome::PartiallyUndone { failures }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, RollbackOutcome::FullyUndone)
    }

    pub fn failures(&self) -> &[UndoFailure] {
        match self {
            RollbackOutcome::FullyUndone => &[],
            RollbackOutcome::PartiallyUndone { failures } => failures,
        }
    }
}

/// Install attempt plus the rollback it triggered, if any.
#[derive(Debug)]
pub struct InstallReport {
    pub outcome: InstallOutcome,
    pub rollback: Option<RollbackOutcome>,
}

/// Flat, serializable rendering of an `InstallReport` for transcripts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReportView {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<InstallSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<EligibilityReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub journal_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackOutcome>,
}

impl From<&InstallReport> for InstallReportView {
    fn from(report: &InstallReport) -> Self {
        let mut view = InstallReportView {
            outcome: report.outcome.label(),
            summary: None,
            reason: None,
            error: None,
            journal_steps: Vec::new(),
            rollback: report.rollback.clone(),
        };
        match &report.outcome {
            InstallOutcome::Success(summary) => view.summary = Some(summary.clone()),
            InstallOutcome::Rejected(reason) => view.reason = Some(*reason),
            InstallOutcome::Failed { error, journal } => {
                view.error = Some(error.to_string());
                view.journal_steps = journal.steps().iter().map(|s| format!("{:?}", s)).collect();
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_outcome_depends_only_on_failures() {
        assert_eq!(RollbackOutcome::from_failures(vec![]), RollbackOutcome::FullyUndone);
        let partial =
            RollbackOutcome::from_failures(vec![UndoFailure::new("delete_user", "HOST\\agentuser", "denied")]);
        assert!(!partial.is_complete());
        assert_eq!(partial.failures().len(), 1);
    }

    #[test]
    fn rollback_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(RollbackOutcome::FullyUndone).unwrap();
        assert_eq!(json["status"], "fullyUndone");
    }

    #[test]
    fn rejected_report_view_carries_reason() {
        let report = InstallReport {
            outcome: InstallOutcome::Rejected(EligibilityReason::InvalidStateServiceWithoutUser),
            rollback: None,
        };
        let view = InstallReportView::from(&report);
        assert_eq!(view.outcome, "rejected");
        assert_eq!(view.reason, Some(EligibilityReason::InvalidStateServiceWithoutUser));
        assert!(view.summary.is_none());
    }
}

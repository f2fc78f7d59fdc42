// Error taxonomy for install / rollback / uninstall.
//
// - RejectedByPolicy: eligibility said no; nothing was mutated.
// - Capability: an OS-level call failed; fatal to the current step, triggers rollback.
// - Best-effort failures (symlink, undo steps) are never raised as `InstallError`; they are
//   logged and collected into `UndoFailure`s instead.

use std::fmt;
use thiserror::Error;

use crate::capability::CapabilityError;
use crate::installation::eligibility::EligibilityReason;
use crate::journal::JournalError;
use crate::security::password::PasswordError;

/// Sequencer / undo step names, used in errors and log tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    CreateUser,
    ResetPassword,
    GrantRights,
    AddToGroups,
    InstallServices,
    GrantAcls,
    CreateSymlink,
    StartService,
    StopService,
    SaveInstallRecord,
}

impl InstallStep {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallStep::CreateUser => "create_user",
            InstallStep::ResetPassword => "reset_password",
            InstallStep::GrantRights => "grant_rights",
            InstallStep::AddToGroups => "add_to_groups",
            InstallStep::InstallServices => "install_services",
            InstallStep::GrantAcls => "grant_acls",
            InstallStep::CreateSymlink => "create_symlink",
            InstallStep::StartService => "start_service",
            InstallStep::StopService => "stop_service",
            InstallStep::SaveInstallRecord => "save_install_record",
        }
    }
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("install rejected: {0}")]
    RejectedByPolicy(EligibilityReason),
    #[error("{step} failed: {source}")]
    Capability {
        step: InstallStep,
        #[source]
        source: CapabilityError,
    },
    #[error("machine probe '{probe}' failed: {source}")]
    Probe {
        probe: &'static str,
        #[source]
        source: CapabilityError,
    },
    #[error("invalid account name: {0}")]
    InvalidAccount(String),
    #[error("password generation failed: {0}")]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u128 },
}

impl InstallError {
    pub fn capability(step: InstallStep) -> impl FnOnce(CapabilityError) -> InstallError {
        move |source| InstallError::Capability { step, source }
    }
}

// Eligibility decision
//
// Pure function over probed machine facts. No I/O, no logging; the caller logs the decision.
//
// Evaluation order (first match wins):
//   1. service without user                         -> reject (InvalidStateServiceWithoutUser)
//   2. DC, user or service missing, no password     -> reject (MissingPasswordForDomainInstall)
//   3. user and service present                     -> upgrade
//   4. DC, anything left                            -> allow (fresh / service-only)
//   5. user without service, domain, no password    -> reject (MissingPasswordForDomainInstall)
//      user without service, local account         -> reject (InvalidStateUserWithoutServiceNonDomain)
//      user without service, domain, password      -> service-only
//   6. nothing present                              -> fresh install

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::state::MachineFacts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EligibilityReason {
    Ok,
    MissingPasswordForDomainInstall,
    InvalidStateServiceWithoutUser,
    InvalidStateUserWithoutServiceNonDomain,
}

impl EligibilityReason {
    /// Operator-facing remedy.
    pub fn operator_hint(self) -> &'static str {
        match self {
            EligibilityReason::Ok => "No action required.",
            EligibilityReason::MissingPasswordForDomainInstall => {
                "A password is required for this account. Supply the existing account's password, \
                 or the password the new domain account should be created with."
            }
            EligibilityReason::InvalidStateServiceWithoutUser => {
                "The agent service is registered but its account is missing. Uninstall the \
                 existing agent (or delete the service) and retry."
            }
            EligibilityReason::InvalidStateUserWithoutServiceNonDomain => {
                "A local account with this name already exists but the agent service is not \
                 installed. Delete the account or choose a different username and retry."
            }
        }
    }
}

impl fmt::Display for EligibilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPath {
    FreshInstall,
    ServiceInstallOnly,
    Upgrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityDecision {
    pub allowed: bool,
    pub should_reset_password: bool,
    pub reason: EligibilityReason,
    pub path: Option<InstallPath>,
}

impl EligibilityDecision {
    fn allow(path: InstallPath, should_reset_password: bool) -> Self {
        Self {
            allowed: true,
            should_reset_password,
            reason: EligibilityReason::Ok,
            path: Some(path),
        }
    }

    fn reject(reason: EligibilityReason) -> Self {
        Self {
            allowed: false,
            should_reset_password: false,
            reason,
            path: None,
        }
    }
}

/// Decide whether the install may proceed.
///
/// `password_provided` means the operator supplied a non-empty password; `reset_requested`
/// asks for the existing account's password to be reset (only honored when the account
/// exists and the install is allowed).
pub fn can_install(
    facts: &MachineFacts,
    password_provided: bool,
    reset_requested: bool,
) -> EligibilityDecision {
    let MachineFacts {
        is_domain_controller: dc,
        user_exists: user,
        service_exists: service,
        is_domain_user: domain_user,
    } = *facts;

    if !user && service {
        return EligibilityDecision::reject(EligibilityReason::InvalidStateServiceWithoutUser);
    }

    // No local SAM on a DC: any account we touch is a domain account.
    if dc && (!user || !service) && !password_provided {
        return EligibilityDecision::reject(EligibilityReason::MissingPasswordForDomainInstall);
    }

    if user && service {
        return EligibilityDecision::allow(InstallPath::Upgrade, reset_requested);
    }

    if user {
        // User without service.
        if dc {
            return EligibilityDecision::allow(InstallPath::ServiceInstallOnly, reset_requested);
        }
        if !domain_user {
            return EligibilityDecision::reject(
                EligibilityReason::InvalidStateUserWithoutServiceNonDomain,
            );
        }
        if !password_provided {
            return EligibilityDecision::reject(EligibilityReason::MissingPasswordForDomainInstall);
        }
        return EligibilityDecision::allow(InstallPath::ServiceInstallOnly, reset_requested);
    }

    // Neither user nor service; reset has nothing to act on.
    EligibilityDecision::allow(InstallPath::FreshInstall, false)
}

// State probe
//
// Read-only queries that establish the machine facts for one attempt. Never mutates.

use log::{debug, info, warn};

use crate::capability::{AccountInfo, CapabilityError, CapabilityProvider};
use crate::config::InstallerConfig;
use crate::error::InstallError;
use crate::models::state::MachineFacts;
use crate::utils::logging::mask_sensitive;
use crate::utils::validation::AccountName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserExists {
    Yes(AccountInfo),
    No,
    Error(CapabilityError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceExists {
    Yes,
    No,
    Error(CapabilityError),
}

/// Facts plus the resolved account, which the sequencer needs when the user already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub facts: MachineFacts,
    pub existing_account: Option<AccountInfo>,
}

/// Whether this machine is a domain controller.
///
/// Fails open: if the role cannot be determined the machine is treated as a member server and a
/// warning is logged. Installing as if on a member server is the conservative choice because the
/// DC-only relaxations are skipped.
pub async fn probe_domain_role(provider: &dyn CapabilityProvider) -> bool {
    match provider.is_domain_controller().await {
        Ok(is_dc) => {
            debug!(
                "[PHASE: probe] [STEP: domain_role] is_domain_controller={}",
                is_dc
            );
            is_dc
        }
        Err(e) => {
            warn!(
                "[PHASE: probe] [STEP: domain_role] Could not determine domain role; assuming member server: {}",
                e
            );
            false
        }
    }
}

pub async fn probe_user_exists(provider: &dyn CapabilityProvider, name: &AccountName) -> UserExists {
    match provider.lookup_user(name).await {
        Ok(info) => UserExists::Yes(info),
        Err(CapabilityError::NotFound(_)) => UserExists::No,
        Err(e) => UserExists::Error(e),
    }
}

pub async fn probe_service_exists(provider: &dyn CapabilityProvider, name: &str) -> ServiceExists {
    match provider.service_exists(name).await {
        Ok(true) => ServiceExists::Yes,
        Ok(false) | Err(CapabilityError::NotFound(_)) => ServiceExists::No,
        Err(e) => ServiceExists::Error(e),
    }
}

/// Run all probes for `account`. A probe that cannot answer aborts the attempt: the decision
/// table has no row for "unknown".
pub async fn probe_machine(
    provider: &dyn CapabilityProvider,
    config: &InstallerConfig,
    account: &AccountName,
) -> Result<ProbeReport, InstallError> {
    let computer_name = provider.computer_name();
    let is_domain_controller = probe_domain_role(provider).await;

    let existing_account = match probe_user_exists(provider, account).await {
        UserExists::Yes(info) => Some(info),
        UserExists::No => None,
        UserExists::Error(source) => {
            return Err(InstallError::Probe {
                probe: "user_exists",
                source,
            })
        }
    };

    let service_exists = match probe_service_exists(provider, &config.primary_service).await {
        ServiceExists::Yes => true,
        ServiceExists::No => false,
        ServiceExists::Error(source) => {
            return Err(InstallError::Probe {
                probe: "service_exists",
                source,
            })
        }
    };

    let facts = MachineFacts {
        is_domain_controller,
        user_exists: existing_account.is_some(),
        service_exists,
        is_domain_user: account.is_domain_qualified(&computer_name),
    };
    info!(
        "[PHASE: probe] [STEP: facts] account={} dc={} user_exists={} service_exists={} domain_user={}",
        mask_sensitive(&account.qualified(&computer_name)),
        facts.is_domain_controller,
        facts.user_exists,
        facts.service_exists,
        facts.is_domain_user
    );

    Ok(ProbeReport {
        facts,
        existing_account,
    })
}

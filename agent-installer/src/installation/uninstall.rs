// Uninstall
//
// Removes what a successful install left behind, using the install record to identify the
// service account by SID. Accounts the operator supplied are stripped of the installer's ACL
// entries but otherwise left alone; only an account this installer created is deleted.

use log::{info, warn};

use crate::capability::CapabilityProvider;
use crate::config::InstallerConfig;
use crate::installation::files::delete_auth_token;
use crate::installation::rollback::UndoSequencer;
use crate::journal::InstallRecord;
use crate::models::responses::{RollbackOutcome, UndoFailure};
use crate::utils::logging::mask_sensitive;
use crate::utils::validation::AccountName;

pub async fn uninstall(
    config: &InstallerConfig,
    provider: &dyn CapabilityProvider,
    record: Option<&InstallRecord>,
) -> RollbackOutcome {
    let undo = UndoSequencer::new(config, provider);
    let services: Vec<String> = config.services.iter().map(|s| s.name.clone()).collect();
    info!(
        "[PHASE: uninstall] [STEP: start] services={} record={}",
        services.len(),
        record.is_some()
    );

    // Dependents are listed after the primary service; remove_services walks newest-first.
    let mut failures: Vec<UndoFailure> = undo.remove_services(&services).await;

    match record {
        Some(rec) => {
            let name = AccountName {
                domain: Some(rec.domain.clone()),
                user: rec.username.clone(),
            };
            if !rec.created_user {
                info!(
                    "[PHASE: uninstall] [STEP: account] {} was supplied by the operator; keeping it",
                    mask_sensitive(&format!("{}\\{}", rec.domain, rec.username))
                );
            }
            failures.extend(undo.remove_account(&name, &rec.sid, rec.created_user).await);
        }
        None => warn!(
            "[PHASE: uninstall] [STEP: account] No install record; service account is left in place"
        ),
    }

    if let Some(f) = delete_auth_token(provider, &config.paths.auth_token_file).await {
        failures.push(f);
    }

    let outcome = RollbackOutcome::from_failures(failures);
    info!(
        "[PHASE: uninstall] [STEP: done] complete={} failures={}",
        outcome.is_complete(),
        outcome.failures().len()
    );
    outcome
}

// Undo sequencer
//
// Walks a rollback journal newest-first and compensates each entry. Every undo step is
// best-effort: failures are logged, collected, and the walk continues.
//
// After the journal walk (regardless of its contents):
// - the agent auth token is deleted
// - if no services were registered by the attempt, the pre-existing primary service is restarted
//   so an upgrade failure leaves the old agent running

use log::{info, warn};
use std::time::Instant;

use crate::capability::{CapabilityError, CapabilityProvider, Sid};
use crate::config::InstallerConfig;
use crate::installation::files::{delete_auth_token, strip_acls};
use crate::installation::service::{start_service_and_wait, stop_service_and_wait};
use crate::journal::{JournalEntry, JournalStep, RollbackJournal};
use crate::models::responses::{RollbackOutcome, UndoFailure};
use crate::utils::logging::mask_sensitive;
use crate::utils::validation::AccountName;

pub struct UndoSequencer<'a> {
    config: &'a InstallerConfig,
    provider: &'a dyn CapabilityProvider,
}

impl<'a> UndoSequencer<'a> {
    pub fn new(config: &'a InstallerConfig, provider: &'a dyn CapabilityProvider) -> Self {
        Self { config, provider }
    }

    pub async fn run(&self, journal: &RollbackJournal) -> RollbackOutcome {
        let started = Instant::now();
        info!(
            "[PHASE: rollback] [STEP: start] attempt_id={} entries={}",
            journal.attempt_id(),
            journal.entries().len()
        );

        let mut failures = Vec::new();
        for entry in journal.entries().iter().rev() {
            match entry.step {
                JournalStep::ServicesInstalled => {
                    failures.extend(self.remove_services(&entry.service_names).await)
                }
                JournalStep::UserCreated => failures.extend(self.remove_created_user(entry).await),
            }
        }

        if let Some(f) = delete_auth_token(self.provider, &self.config.paths.auth_token_file).await {
            failures.push(f);
        }

        if !journal.contains(JournalStep::ServicesInstalled) {
            failures.extend(self.restart_existing_service().await);
        }

        let outcome = RollbackOutcome::from_failures(failures);
        match &outcome {
            RollbackOutcome::FullyUndone => info!(
                "[PHASE: rollback] [STEP: done] attempt_id={} fully undone (duration_ms={})",
                journal.attempt_id(),
                started.elapsed().as_millis()
            ),
            RollbackOutcome::PartiallyUndone { failures } => warn!(
                "[PHASE: rollback] [STEP: done] attempt_id={} partially undone ({} failures, duration_ms={})",
                journal.attempt_id(),
                failures.len(),
                started.elapsed().as_millis()
            ),
        }
        outcome
    }

    /// Stop then delete, newest first. Services that are already gone count as removed.
    pub(crate) async fn remove_services(&self, names: &[String]) -> Vec<UndoFailure> {
        let mut failures = Vec::new();
        for name in names.iter().rev() {
            if let Err(e) =
                stop_service_and_wait(self.provider, name, &self.config.service_wait).await
            {
                // Deletion is still attempted; SCM marks a running service for delete.
                warn!(
                    "[PHASE: rollback] [STEP: stop_service] {} did not stop: {}",
                    name, e
                );
                failures.push(UndoFailure::new("stop_service", name.clone(), e));
            }
            match self.provider.delete_service(name).await {
                Ok(()) => info!("[PHASE: rollback] [STEP: delete_service] Removed {}", name),
                Err(CapabilityError::NotFound(_)) => {}
                Err(e) => {
                    warn!(
                        "[PHASE: rollback] [STEP: delete_service] Failed to remove {}: {}",
                        name, e
                    );
                    failures.push(UndoFailure::new("delete_service", name.clone(), e));
                }
            }
        }
        failures
    }

    async fn remove_created_user(&self, entry: &JournalEntry) -> Vec<UndoFailure> {
        let (Some(username), Some(sid)) = (entry.created_username.as_ref(), entry.created_sid.as_ref())
        else {
            warn!("[PHASE: rollback] [STEP: delete_user] Journal entry lacks account identity; skipping");
            return vec![UndoFailure::new(
                "delete_user",
                entry.created_username.clone().unwrap_or_default(),
                "journal entry has no SID",
            )];
        };
        let name = AccountName {
            domain: entry.created_domain.clone(),
            user: username.clone(),
        };
        self.remove_account(&name, sid, true).await
    }

    /// Strip the installer's ACL entries for `sid`. When `delete_account`, also leave the groups,
    /// revoke the rights and delete the account, which is looked up by name and deleted only if it
    /// still carries `sid`.
    pub(crate) async fn remove_account(
        &self,
        name: &AccountName,
        sid: &Sid,
        delete_account: bool,
    ) -> Vec<UndoFailure> {
        let computer_name = self.provider.computer_name();
        let display = name.qualified(&computer_name);
        let mut failures = strip_acls(self.provider, &self.config.acl_targets(), sid).await;

        // Rights and memberships of an operator-supplied account may predate the install.
        if !delete_account {
            return failures;
        }

        for group in self.config.groups.iter().rev() {
            match self.provider.remove_from_group(sid, *group).await {
                Ok(()) | Err(CapabilityError::NotMember(_)) | Err(CapabilityError::NotFound(_)) => {}
                Err(e) => {
                    warn!(
                        "[PHASE: rollback] [STEP: remove_from_group] {:?}: {}",
                        group, e
                    );
                    failures.push(UndoFailure::new("remove_from_group", format!("{:?}", group), e));
                }
            }
        }

        for right in self.config.rights.iter().rev() {
            if let Err(e) = self.provider.revoke_right(sid, *right).await {
                warn!(
                    "[PHASE: rollback] [STEP: revoke_right] {}: {}",
                    right.lsa_name(),
                    e
                );
                failures.push(UndoFailure::new("revoke_right", right.lsa_name(), e));
            }
        }

        match self.provider.lookup_user(name).await {
            Ok(info) if &info.sid == sid => match self.provider.delete_user(name).await {
                Ok(()) => info!(
                    "[PHASE: rollback] [STEP: delete_user] Removed {} (sid={})",
                    mask_sensitive(&display),
                    sid
                ),
                Err(CapabilityError::NotFound(_)) => {}
                Err(e) => {
                    warn!("[PHASE: rollback] [STEP: delete_user] {}: {}", display, e);
                    failures.push(UndoFailure::new("delete_user", display, e));
                }
            },
            Ok(info) => {
                warn!(
                    "[PHASE: rollback] [STEP: delete_user] {} now has sid={} (expected {}); not deleting",
                    display, info.sid, sid
                );
                failures.push(UndoFailure::new(
                    "delete_user",
                    display,
                    format!("account SID changed to {}", info.sid),
                ));
            }
            Err(CapabilityError::NotFound(_)) => {
                info!(
                    "[PHASE: rollback] [STEP: delete_user] {} already gone",
                    mask_sensitive(&display)
                );
            }
            Err(e) => {
                warn!("[PHASE: rollback] [STEP: delete_user] {}: {}", display, e);
                failures.push(UndoFailure::new("delete_user", display, e));
            }
        }
        failures
    }

    async fn restart_existing_service(&self) -> Vec<UndoFailure> {
        let name = self.config.primary_service.as_str();
        match self.provider.service_exists(name).await {
            Ok(true) => {}
            Ok(false) | Err(CapabilityError::NotFound(_)) => return Vec::new(),
            Err(e) => return vec![UndoFailure::new("restart_service", name, e)],
        }
        match start_service_and_wait(self.provider, name, &self.config.service_wait).await {
            Ok(()) => {
                info!(
                    "[PHASE: rollback] [STEP: restart_service] Pre-existing {} is running",
                    name
                );
                Vec::new()
            }
            Err(e) => {
                warn!(
                    "[PHASE: rollback] [STEP: restart_service] Could not restart {}: {}",
                    name, e
                );
                vec![UndoFailure::new("restart_service", name, e)]
            }
        }
    }
}

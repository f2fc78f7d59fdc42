// Action sequencer
//
// Executes an allowed decision as a fixed step sequence:
//   1. create user (fresh path) or reset password (when requested)
//   2. grant account rights
//   3. add to builtin groups (only for a user created here)
//   4. register / update services
//   5. grant resource ACLs
//   6. legacy symlink (best-effort)
//
// Each created account and service is journaled as soon as the provider confirms it, before the
// next step starts. The first hard failure stops the sequence; the journal then describes
// exactly what the caller must undo.
//
// The attempt deadline bounds every provider call individually. Journal appends are never
// cancelled, and a create whose reply missed the deadline is reconciled against the machine
// before the sequencer gives up, so nothing it created escapes the journal.

use log::{debug, error, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use uuid::Uuid;

use crate::capability::{AccountInfo, CapabilityError, CapabilityProvider, ServiceSpec};
use crate::config::InstallerConfig;
use crate::error::{InstallError, InstallStep};
use crate::installation::eligibility::EligibilityDecision;
use crate::installation::files::{create_legacy_symlink, grant_acls};
use crate::installation::probe::ProbeReport;
use crate::journal::{JournalEntry, JournalWriter, RollbackJournal, StateStore};
use crate::security::password::PasswordGenerator;
use crate::security::secret::Secret;
use crate::utils::logging::mask_sensitive;
use crate::utils::validation::AccountName;

// Bound on the lookups that follow an unanswered create.
const RECONCILE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceOutput {
    pub account: AccountInfo,
    pub created_user: bool,
    pub password_reset: bool,
    pub services_created: Vec<String>,
    pub symlink_created: bool,
    pub password_cleared: bool,
}

struct CredentialOutcome {
    account: AccountInfo,
    created_user: bool,
    password_reset: bool,
    services_created: Vec<String>,
}

pub struct ActionSequencer<'a> {
    config: &'a InstallerConfig,
    provider: &'a dyn CapabilityProvider,
    writer: JournalWriter<'a>,
    deadline: Instant,
}

impl<'a> ActionSequencer<'a> {
    pub fn new(
        config: &'a InstallerConfig,
        provider: &'a dyn CapabilityProvider,
        store: &'a dyn StateStore,
        attempt_id: Uuid,
    ) -> Self {
        Self {
            config,
            provider,
            writer: JournalWriter::new(store, attempt_id),
            deadline: Instant::now() + config.overall_timeout(),
        }
    }

    /// Replace the default deadline (now + overall timeout) with the attempt's own.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn journal(&self) -> &RollbackJournal {
        self.writer.journal()
    }

    pub fn into_journal(self) -> RollbackJournal {
        self.writer.into_journal()
    }

    /// Run the sequence. `provided_password` is cleared before this returns, success or not.
    pub async fn run(
        &mut self,
        account_name: &AccountName,
        probe: &ProbeReport,
        decision: &EligibilityDecision,
        mut provided_password: Option<&mut Secret>,
    ) -> Result<SequenceOutput, InstallError> {
        let started = Instant::now();
        info!(
            "[PHASE: sequencer] [STEP: start] attempt_id={} path={:?} reset_password={}",
            self.journal().attempt_id(),
            decision.path,
            decision.should_reset_password
        );

        let needs_password = !probe.facts.user_exists || decision.should_reset_password;
        let has_provided = provided_password
            .as_deref()
            .map(|p| !p.is_empty() && !p.is_cleared())
            .unwrap_or(false);
        let mut generated: Option<Secret> = None;
        let credentials = if needs_password && !has_provided {
            match PasswordGenerator::system(self.config.password_max_attempts).generate() {
                Ok(secret) => {
                    debug!("[PHASE: sequencer] [STEP: password] Generated account password");
                    generated = Some(secret);
                    self.credential_steps(account_name, probe, decision, generated.as_ref())
                        .await
                }
                Err(e) => Err(InstallError::from(e)),
            }
        } else {
            let password = if has_provided {
                provided_password.as_deref()
            } else {
                None
            };
            self.credential_steps(account_name, probe, decision, password)
                .await
        };

        // Steps 5 and 6 never need the password.
        if let Some(p) = provided_password.as_deref_mut() {
            p.clear();
        }
        if let Some(g) = generated.as_mut() {
            g.clear();
        }
        let password_cleared = provided_password
            .as_deref()
            .map(Secret::is_cleared)
            .unwrap_or(true)
            && generated.as_ref().map(Secret::is_cleared).unwrap_or(true);
        drop(generated);

        let credentials = credentials?;

        // 5. ACLs (additive; rollback strips by SID whether or not every grant landed)
        let targets = self.config.acl_targets();
        match timeout_at(
            self.deadline,
            grant_acls(self.provider, &targets, &credentials.account.sid),
        )
        .await
        {
            Ok(granted) => granted?,
            Err(_) => return Err(self.timed_out(InstallStep::GrantAcls)),
        }

        // 6. Legacy symlink
        let symlink_created = timeout_at(
            self.deadline,
            create_legacy_symlink(self.provider, &self.config.paths),
        )
        .await
        .unwrap_or_else(|_| {
            warn!("[PHASE: sequencer] [STEP: symlink] Deadline reached; skipping legacy symlink");
            false
        });

        info!(
            "[PHASE: sequencer] [STEP: done] attempt_id={} created_user={} services_created={} duration_ms={}",
            self.journal().attempt_id(),
            credentials.created_user,
            credentials.services_created.len(),
            started.elapsed().as_millis()
        );
        Ok(SequenceOutput {
            account: credentials.account,
            created_user: credentials.created_user,
            password_reset: credentials.password_reset,
            services_created: credentials.services_created,
            symlink_created,
            password_cleared,
        })
    }

    fn timed_out(&self, step: InstallStep) -> InstallError {
        InstallError::Timeout {
            operation: step.as_str().to_string(),
            timeout_ms: self.config.overall_timeout().as_millis(),
        }
    }

    /// One provider call under the attempt deadline. Only for calls that are safe to abandon.
    async fn bounded<T>(
        &self,
        step: InstallStep,
        call: impl Future<Output = Result<T, CapabilityError>>,
    ) -> Result<T, InstallError> {
        match timeout_at(self.deadline, call).await {
            Ok(result) => result.map_err(InstallError::capability(step)),
            Err(_) => Err(self.timed_out(step)),
        }
    }

    /// Steps 1-4: everything that consumes the password.
    async fn credential_steps(
        &mut self,
        account_name: &AccountName,
        probe: &ProbeReport,
        decision: &EligibilityDecision,
        password: Option<&Secret>,
    ) -> Result<CredentialOutcome, InstallError> {
        let provider = self.provider;
        let config = self.config;

        // 1. Account
        let (account, created_user, password_reset) = match &probe.existing_account {
            None => {
                let pw = password.ok_or_else(|| InstallError::Capability {
                    step: InstallStep::CreateUser,
                    source: CapabilityError::os("CreateUser", "no password available"),
                })?;
                let created = timeout_at(
                    self.deadline,
                    provider.create_user(account_name, pw, &config.account_comment),
                )
                .await;
                let info = match created {
                    Ok(result) => result.map_err(InstallError::capability(InstallStep::CreateUser))?,
                    Err(_) => {
                        if let Some(info) = self.find_unanswered_user(account_name).await {
                            self.journal_created_user(account_name, &info).await?;
                        }
                        return Err(self.timed_out(InstallStep::CreateUser));
                    }
                };
                self.journal_created_user(account_name, &info).await?;
                info!(
                    "[PHASE: sequencer] [STEP: create_user] Created {} (sid={})",
                    mask_sensitive(&format!("{}\\{}", info.domain, info.username)),
                    info.sid
                );
                (info, true, false)
            }
            Some(existing) => {
                let mut reset = false;
                if decision.should_reset_password {
                    let pw = password.ok_or_else(|| InstallError::Capability {
                        step: InstallStep::ResetPassword,
                        source: CapabilityError::os("SetUserPassword", "no password available"),
                    })?;
                    self.bounded(
                        InstallStep::ResetPassword,
                        provider.set_user_password(account_name, pw),
                    )
                    .await?;
                    info!(
                        "[PHASE: sequencer] [STEP: reset_password] Reset password for {}",
                        mask_sensitive(&format!("{}\\{}", existing.domain, existing.username))
                    );
                    reset = true;
                }
                (existing.clone(), false, reset)
            }
        };

        // 2. Rights (idempotent grants)
        for right in &config.rights {
            self.bounded(
                InstallStep::GrantRights,
                provider.grant_right(&account.sid, *right),
            )
            .await?;
        }
        debug!(
            "[PHASE: sequencer] [STEP: grant_rights] Granted {} rights",
            config.rights.len()
        );

        // 3. Groups
        if created_user {
            for group in &config.groups {
                let joined = timeout_at(self.deadline, provider.add_to_group(&account.sid, *group));
                match joined.await {
                    Ok(Ok(())) | Ok(Err(CapabilityError::AlreadyMember(_))) => {}
                    Ok(Err(e)) => return Err(InstallError::capability(InstallStep::AddToGroups)(e)),
                    Err(_) => return Err(self.timed_out(InstallStep::AddToGroups)),
                }
            }
            debug!(
                "[PHASE: sequencer] [STEP: add_to_groups] Joined {} groups",
                config.groups.len()
            );
        }

        // 4. Services
        let services_created = self.install_services(&account, password).await?;

        Ok(CredentialOutcome {
            account,
            created_user,
            password_reset,
            services_created,
        })
    }

    /// Journal a freshly created account. If the journal refuses it, the account is removed
    /// again, since rollback could never see it.
    async fn journal_created_user(
        &mut self,
        account_name: &AccountName,
        info: &AccountInfo,
    ) -> Result<(), InstallError> {
        if let Err(e) = self.writer.append(JournalEntry::user_created(info)).await {
            if let Err(del) = self.provider.delete_user(account_name).await {
                error!(
                    "[PHASE: sequencer] [STEP: create_user] Could not remove unjournaled account {}\\{}: {}",
                    info.domain, info.username, del
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// After `create_user` missed the deadline: the account the probe found absent may exist now.
    async fn find_unanswered_user(&self, account_name: &AccountName) -> Option<AccountInfo> {
        match timeout(RECONCILE_GRACE, self.provider.lookup_user(account_name)).await {
            Ok(Ok(info)) => {
                warn!(
                    "[PHASE: sequencer] [STEP: create_user] {}\\{} exists although create_user never answered",
                    info.domain, info.username
                );
                Some(info)
            }
            Ok(Err(CapabilityError::NotFound(_))) => None,
            Ok(Err(e)) => {
                error!(
                    "[PHASE: sequencer] [STEP: create_user] Could not confirm whether {} was created: {}",
                    account_name, e
                );
                None
            }
            Err(_) => {
                error!(
                    "[PHASE: sequencer] [STEP: create_user] Lookup of {} did not answer either",
                    account_name
                );
                None
            }
        }
    }

    /// Register missing services and repoint existing ones. Every created service is journaled
    /// before the next one is touched.
    async fn install_services(
        &mut self,
        account: &AccountInfo,
        password: Option<&Secret>,
    ) -> Result<Vec<String>, InstallError> {
        let provider = self.provider;
        let config = self.config;
        let logon = format!("{}\\{}", account.domain, account.username);
        let mut created: Vec<String> = Vec::new();

        for def in &config.services {
            let exists = self
                .bounded(InstallStep::InstallServices, provider.service_exists(&def.name))
                .await?;
            if exists {
                self.bounded(
                    InstallStep::InstallServices,
                    provider.update_service_binary_path(&def.name, &def.binary_path),
                )
                .await?;
                debug!(
                    "[PHASE: sequencer] [STEP: install_services] Updated {} -> {:?}",
                    def.name, def.binary_path
                );
                continue;
            }

            let spec = ServiceSpec {
                name: def.name.clone(),
                display_name: def.display_name.clone(),
                binary_path: def.binary_path.clone(),
                dependencies: def.dependencies.clone(),
                start_type: def.start_type,
                account: logon.clone(),
            };
            match timeout_at(self.deadline, provider.create_service(&spec, password)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        "[PHASE: sequencer] [STEP: install_services] Service {} failed: {}",
                        def.name, e
                    );
                    return Err(InstallError::capability(InstallStep::InstallServices)(e));
                }
                Err(_) => {
                    if self.service_may_exist(&def.name).await {
                        self.journal_created_service(&def.name).await?;
                    }
                    return Err(self.timed_out(InstallStep::InstallServices));
                }
            }
            self.journal_created_service(&def.name).await?;
            debug!(
                "[PHASE: sequencer] [STEP: install_services] Registered {} as {}",
                def.name, logon
            );
            created.push(def.name.clone());
        }

        info!(
            "[PHASE: sequencer] [STEP: install_services] {} services registered, {} updated",
            created.len(),
            config.services.len() - created.len()
        );
        Ok(created)
    }

    async fn journal_created_service(&mut self, name: &str) -> Result<(), InstallError> {
        let entry = JournalEntry::services_installed(vec![name.to_string()]);
        if let Err(e) = self.writer.append(entry).await {
            match self.provider.delete_service(name).await {
                Ok(()) | Err(CapabilityError::NotFound(_)) => {}
                Err(del) => error!(
                    "[PHASE: sequencer] [STEP: install_services] Could not remove unjournaled service {}: {}",
                    name, del
                ),
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// After `create_service` missed the deadline. Anything but a confirmed "absent" counts as
    /// present; rollback tolerates deleting a service that is not there.
    async fn service_may_exist(&self, name: &str) -> bool {
        !matches!(
            timeout(RECONCILE_GRACE, self.provider.service_exists(name)).await,
            Ok(Ok(false))
        )
    }
}

// Installation engine
//
// probe -> decide -> sequence -> (on failure) rollback, under one advisory lock per phase and
// one overall deadline per attempt.
//
// IMPORTANT:
// - Never log secrets (passwords are `Secret` and are cleared after the last step that uses them).
// - Nothing mutates the machine before the eligibility decision allows it.

pub mod eligibility;
pub mod files;
pub mod probe;
pub mod rollback;
pub mod sequencer;
pub mod service;
pub mod uninstall;

use chrono::Utc;
use log::{error, info, warn};
use std::time::Instant;
use tokio::time::timeout_at;
use uuid::Uuid;

use crate::capability::CapabilityProvider;
use crate::config::InstallerConfig;
use crate::error::{InstallError, InstallStep};
use crate::journal::{InstallRecord, RollbackJournal, StateStore};
use crate::models::requests::InstallRequest;
use crate::models::responses::{
    InstallOutcome, InstallReport, InstallSummary, RollbackOutcome, UndoFailure,
};
use crate::utils::validation::AccountName;

use eligibility::{can_install, EligibilityDecision};
use probe::{probe_machine, ProbeReport};
use rollback::UndoSequencer;
use sequencer::ActionSequencer;

pub struct InstallEngine<'a> {
    config: &'a InstallerConfig,
    provider: &'a dyn CapabilityProvider,
    store: &'a dyn StateStore,
}

impl<'a> InstallEngine<'a> {
    pub fn new(
        config: &'a InstallerConfig,
        provider: &'a dyn CapabilityProvider,
        store: &'a dyn StateStore,
    ) -> Self {
        Self {
            config,
            provider,
            store,
        }
    }

    fn account_name(&self, request: &InstallRequest) -> Result<AccountName, InstallError> {
        let raw = request.username_or(&self.config.default_username);
        AccountName::parse(raw).map_err(|e| InstallError::InvalidAccount(e.to_string()))
    }

    /// Probe and decide without mutating anything.
    pub async fn plan(
        &self,
        request: &InstallRequest,
    ) -> Result<(ProbeReport, EligibilityDecision), InstallError> {
        let account = self.account_name(request)?;
        let report = probe_machine(self.provider, self.config, &account).await?;
        let decision = can_install(&report.facts, request.has_password(), request.reset_password);
        Ok((report, decision))
    }

    /// One install attempt. Does not roll back; a `Failed` outcome carries the journal to undo.
    pub async fn run_install(&self, request: &mut InstallRequest) -> InstallOutcome {
        let outcome = self.install_attempt(request).await;
        // Whatever happened, the caller's password is not needed any more.
        if let Some(p) = request.password.as_mut() {
            p.clear();
        }
        outcome
    }

    async fn install_attempt(&self, request: &mut InstallRequest) -> InstallOutcome {
        let started = Instant::now();
        let failed_early = |error: InstallError| InstallOutcome::Failed {
            error,
            journal: RollbackJournal::new(Uuid::nil()),
        };

        let _lock = match self.store.acquire_lock().await {
            Ok(lock) => lock,
            Err(e) => return failed_early(e.into()),
        };
        let limit = self.config.overall_timeout();
        let deadline = tokio::time::Instant::now() + limit;

        let account = match self.account_name(request) {
            Ok(a) => a,
            Err(e) => return failed_early(e),
        };
        let probed = timeout_at(deadline, probe_machine(self.provider, self.config, &account))
            .await
            .unwrap_or_else(|_| {
                Err(InstallError::Timeout {
                    operation: "probe".to_string(),
                    timeout_ms: limit.as_millis(),
                })
            });
        let report = match probed {
            Ok(r) => r,
            Err(e) => {
                error!("[PHASE: install] [STEP: probe] {}", e);
                return failed_early(e);
            }
        };

        let decision = can_install(&report.facts, request.has_password(), request.reset_password);
        if !decision.allowed {
            warn!(
                "[PHASE: install] [STEP: decide] Install rejected: {} ({})",
                decision.reason,
                decision.reason.operator_hint()
            );
            return InstallOutcome::Rejected(decision.reason);
        }
        let Some(path) = decision.path else {
            return InstallOutcome::Rejected(decision.reason);
        };
        info!(
            "[PHASE: install] [STEP: decide] Install allowed (path={:?}, reset_password={})",
            path, decision.should_reset_password
        );

        let attempt_id = Uuid::new_v4();
        // The sequencer enforces the deadline per call; its future is never cancelled mid-step.
        let mut sequencer = ActionSequencer::new(self.config, self.provider, self.store, attempt_id)
            .with_deadline(deadline);
        let result = sequencer
            .run(&account, &report, &decision, request.password.as_mut())
            .await;

        let output = match result {
            Ok(output) => output,
            Err(error) => {
                let journal = self.journal_after_failure(sequencer.into_journal()).await;
                error!(
                    "[PHASE: install] [STEP: sequence] attempt_id={} failed after {} journaled steps: {}",
                    attempt_id,
                    journal.entries().len(),
                    error
                );
                return InstallOutcome::Failed { error, journal };
            }
        };

        if let Err(e) = self.record_install(attempt_id, &output).await {
            let journal = sequencer.into_journal();
            error!(
                "[PHASE: install] [STEP: {}] attempt_id={}: {}",
                InstallStep::SaveInstallRecord,
                attempt_id,
                e
            );
            return InstallOutcome::Failed { error: e, journal };
        }
        if let Err(e) = self.store.clear(attempt_id).await {
            warn!(
                "[PHASE: install] [STEP: finish] Could not clear journal for attempt_id={}: {}",
                attempt_id, e
            );
        }

        info!(
            "[PHASE: install] [STEP: finish] attempt_id={} succeeded (duration_ms={})",
            attempt_id,
            started.elapsed().as_millis()
        );
        InstallOutcome::Success(InstallSummary {
            attempt_id,
            path,
            account: output.account,
            created_user: output.created_user,
            password_reset: output.password_reset,
            services_created: output.services_created,
            symlink_created: output.symlink_created,
            password_cleared: output.password_cleared,
        })
    }

    /// The persisted journal is authoritative: an append whose store write succeeded but whose
    /// reply failed is on disk without being in memory.
    async fn journal_after_failure(&self, in_memory: RollbackJournal) -> RollbackJournal {
        match self.store.read_all(in_memory.attempt_id()).await {
            Ok(entries) if entries.len() > in_memory.entries().len() => {
                RollbackJournal::from_entries(in_memory.attempt_id(), entries)
            }
            Ok(_) => in_memory,
            Err(e) => {
                warn!(
                    "[PHASE: install] [STEP: journal] Could not re-read journal (using in-memory copy): {}",
                    e
                );
                in_memory
            }
        }
    }

    async fn record_install(
        &self,
        attempt_id: Uuid,
        output: &sequencer::SequenceOutput,
    ) -> Result<(), InstallError> {
        // An upgrade keeps ownership of an account an earlier run created.
        let previously_created = match self.store.load_install_record().await {
            Ok(Some(prev)) => prev.created_user && prev.sid == output.account.sid,
            Ok(None) => false,
            Err(e) => {
                warn!(
                    "[PHASE: install] [STEP: {}] Previous install record unreadable: {}",
                    InstallStep::SaveInstallRecord,
                    e
                );
                false
            }
        };
        let record = InstallRecord {
            attempt_id,
            username: output.account.username.clone(),
            domain: output.account.domain.clone(),
            sid: output.account.sid.clone(),
            created_user: output.created_user || previously_created,
            installed_at: Utc::now(),
        };
        self.store.save_install_record(&record).await?;
        Ok(())
    }

    /// Undo one attempt. The journal is cleared from the store only when everything was undone.
    pub async fn run_rollback(&self, journal: &RollbackJournal) -> RollbackOutcome {
        let _lock = match self.store.acquire_lock().await {
            Ok(lock) => lock,
            Err(e) => {
                error!("[PHASE: rollback] [STEP: lock] {}", e);
                return RollbackOutcome::PartiallyUndone {
                    failures: vec![UndoFailure::new("lock", "installer state", e)],
                };
            }
        };

        let outcome = UndoSequencer::new(self.config, self.provider).run(journal).await;
        if outcome.is_complete() {
            if let Err(e) = self.store.clear(journal.attempt_id()).await {
                warn!(
                    "[PHASE: rollback] [STEP: finish] Could not clear journal for attempt_id={}: {}",
                    journal.attempt_id(),
                    e
                );
            }
        } else {
            warn!(
                "[PHASE: rollback] [STEP: finish] Journal for attempt_id={} kept for a later retry",
                journal.attempt_id()
            );
        }
        outcome
    }

    /// Roll back attempts a previous process left behind (crash or partial rollback).
    pub async fn rollback_pending(&self) -> Result<Vec<(Uuid, RollbackOutcome)>, InstallError> {
        let pending = self.store.pending_attempts().await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            "[PHASE: rollback] [STEP: pending] Found {} unfinished attempts",
            pending.len()
        );
        let mut outcomes = Vec::with_capacity(pending.len());
        for attempt_id in pending {
            let entries = self.store.read_all(attempt_id).await?;
            let journal = RollbackJournal::from_entries(attempt_id, entries);
            outcomes.push((attempt_id, self.run_rollback(&journal).await));
        }
        Ok(outcomes)
    }

    /// Install, rolling back automatically if the attempt fails after eligibility.
    pub async fn install(&self, request: &mut InstallRequest) -> InstallReport {
        let outcome = self.run_install(request).await;
        let rollback = match &outcome {
            InstallOutcome::Failed { journal, .. } if journal.attempt_id() != Uuid::nil() => {
                Some(self.run_rollback(journal).await)
            }
            _ => None,
        };
        InstallReport { outcome, rollback }
    }

    /// Remove the installed agent, using the install record to identify the account.
    pub async fn run_uninstall(&self) -> Result<RollbackOutcome, InstallError> {
        let _lock = self.store.acquire_lock().await?;
        let record = self.store.load_install_record().await?;
        let outcome = uninstall::uninstall(self.config, self.provider, record.as_ref()).await;
        if outcome.is_complete() {
            self.store.clear_install_record().await?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::simulated::{MachineSnapshot, Op, SimulatedMachine};
    use crate::capability::{AccountRight, CapabilityError, ServiceState, WellKnownGroup};
    use crate::config::ServiceWaitPolicy;
    use crate::installation::eligibility::{EligibilityReason, InstallPath};
    use crate::journal::{JournalStep, MemoryStateStore};
    use crate::security::crypto::secret_fingerprint;
    use crate::security::secret::Secret;
    use std::path::Path;

    fn config() -> InstallerConfig {
        InstallerConfig {
            service_wait: ServiceWaitPolicy {
                stop_timeout_ms: 100,
                start_timeout_ms: 100,
                min_poll_ms: 1,
                max_poll_ms: 5,
            },
            ..InstallerConfig::default()
        }
    }

    fn success(outcome: &InstallOutcome) -> &InstallSummary {
        match outcome {
            InstallOutcome::Success(s) => s,
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fresh_install_creates_everything() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let cfg = config();
        let engine = InstallEngine::new(&cfg, &m, &store);

        let report = engine.install(&mut InstallRequest::default()).await;
        let summary = success(&report.outcome);
        assert!(report.rollback.is_none());
        assert_eq!(summary.path, InstallPath::FreshInstall);
        assert!(summary.created_user);
        assert!(summary.password_cleared);
        assert_eq!(
            summary.services_created,
            vec!["agent", "agent-trace", "agent-process"]
        );

        let sid = m.user_sid("agentuser").unwrap();
        let snap = m.snapshot();
        assert_eq!(snap.rights[&sid].len(), AccountRight::ALL.len());
        assert!(snap.groups[&WellKnownGroup::EventLogReaders].contains(&sid));
        assert_eq!(
            m.service_spec("agent").map(|s| s.account),
            Some("HOST\\agentuser".to_string())
        );
        assert_eq!(snap.registry_acls.len(), 1);
        assert_eq!(snap.symlinks.len(), 1);

        // journal cleared, record written
        assert!(store.pending_attempts().await.unwrap().is_empty());
        let record = store.load_install_record().await.unwrap().unwrap();
        assert_eq!(record.sid, sid);
        assert!(record.created_user);
    }

    #[tokio::test]
    async fn dc_without_password_is_rejected_before_any_mutation() {
        let m = SimulatedMachine::new("DC01");
        m.set_domain_controller(true);
        let store = MemoryStateStore::new();
        let cfg = config();
        let before = m.snapshot();

        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::new("CORP\\svc"))
            .await;
        assert!(matches!(
            report.outcome,
            InstallOutcome::Rejected(EligibilityReason::MissingPasswordForDomainInstall)
        ));
        assert!(report.rollback.is_none());
        assert_eq!(m.snapshot(), before);
        for op in [Op::CreateUser, Op::GrantRight, Op::CreateService, Op::GrantFileAcl] {
            assert_eq!(m.call_count(op), 0, "{:?} must not run", op);
        }
    }

    #[tokio::test]
    async fn service_without_user_is_rejected() {
        let m = SimulatedMachine::new("HOST");
        m.add_service("agent", Path::new("C:\\agent.exe"), "HOST\\ghost");
        let store = MemoryStateStore::new();
        let cfg = config();
        let mut request = InstallRequest::default().with_password("Correct-Horse-42!");

        let report = InstallEngine::new(&cfg, &m, &store).install(&mut request).await;
        assert!(matches!(
            report.outcome,
            InstallOutcome::Rejected(EligibilityReason::InvalidStateServiceWithoutUser)
        ));
        assert_eq!(m.call_count(Op::CreateUser), 0);
        // rejected attempts still do not keep the password around
        assert!(request.password.as_ref().map(Secret::is_cleared).unwrap_or(false));
    }

    #[tokio::test]
    async fn failure_after_user_creation_rolls_back_to_prior_state() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let cfg = config();
        let admin = crate::capability::Sid("S-1-5-32-544".to_string());
        m.add_file_acl(&cfg.paths.config_dir, &admin, crate::capability::AccessRights::FullControl);
        let before = m.snapshot();

        m.fail_on_target(
            Op::CreateService,
            "agent-process",
            CapabilityError::os("CreateService", "access denied"),
        );
        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::default())
            .await;

        match &report.outcome {
            InstallOutcome::Failed { error, journal } => {
                assert!(matches!(
                    error,
                    InstallError::Capability {
                        step: InstallStep::InstallServices,
                        ..
                    }
                ));
                // each service that was registered before the failure is journaled on its own
                assert_eq!(
                    journal.steps(),
                    vec![
                        JournalStep::UserCreated,
                        JournalStep::ServicesInstalled,
                        JournalStep::ServicesInstalled,
                    ]
                );
                assert_eq!(journal.entries()[2].service_names, vec!["agent-trace"]);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(report.rollback, Some(RollbackOutcome::FullyUndone));
        assert_eq!(m.snapshot(), before);
        assert!(store.pending_attempts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_after_services_rolls_back_both_steps() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let cfg = config();
        let before = m.snapshot();

        let registry = cfg.paths.registry_root.clone();
        m.fail_on_target(Op::GrantRegistryAcl, &registry, CapabilityError::AccessDenied(registry.clone()));
        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::default())
            .await;

        match &report.outcome {
            InstallOutcome::Failed { journal, .. } => assert_eq!(
                journal.steps(),
                vec![
                    JournalStep::UserCreated,
                    JournalStep::ServicesInstalled,
                    JournalStep::ServicesInstalled,
                    JournalStep::ServicesInstalled,
                ]
            ),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(report.rollback, Some(RollbackOutcome::FullyUndone));
        assert_eq!(m.snapshot(), before);
    }

    #[tokio::test]
    async fn journal_outage_before_first_entry_leaves_nothing_behind() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        store.set_fail_appends(true);
        let cfg = config();
        let before = m.snapshot();

        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::default())
            .await;
        assert!(matches!(
            report.outcome,
            InstallOutcome::Failed {
                error: InstallError::Journal(_),
                ..
            }
        ));
        assert_eq!(m.snapshot(), before);
    }

    #[tokio::test]
    async fn upgrade_is_idempotent_and_keeps_account() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let cfg = config();
        let engine = InstallEngine::new(&cfg, &m, &store);

        success(&engine.install(&mut InstallRequest::default()).await.outcome);
        let after_first: MachineSnapshot = m.snapshot();
        let sid = m.user_sid("agentuser").unwrap();
        // user + three services
        assert_eq!(store.append_calls(), 4);

        let report = engine.install(&mut InstallRequest::default()).await;
        let summary = success(&report.outcome);
        assert_eq!(store.append_calls(), 4, "an upgrade must not journal anything");
        assert_eq!(summary.path, InstallPath::Upgrade);
        assert!(!summary.created_user);
        assert!(summary.services_created.is_empty());
        assert_eq!(m.snapshot(), after_first);
        assert_eq!(m.user_sid("agentuser"), Some(sid));

        // ownership survives the upgrade so uninstall can still delete the account
        assert!(store.load_install_record().await.unwrap().unwrap().created_user);
    }

    #[tokio::test]
    async fn failed_upgrade_restarts_existing_service_and_keeps_account() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let cfg = config();
        let engine = InstallEngine::new(&cfg, &m, &store);
        success(&engine.install(&mut InstallRequest::default()).await.outcome);
        service::stop_service_and_wait(&m, "agent", &cfg.service_wait)
            .await
            .unwrap();
        m.add_file(&cfg.paths.auth_token_file);

        m.fail_on(Op::GrantFileAcl, CapabilityError::os("SetNamedSecurityInfo", "sharing violation"));
        let report = engine.install(&mut InstallRequest::default()).await;
        match &report.outcome {
            InstallOutcome::Failed { journal, .. } => assert!(journal.is_empty()),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(report.rollback, Some(RollbackOutcome::FullyUndone));
        assert!(m.user_sid("agentuser").is_some());
        assert_eq!(m.service_state("agent"), Some(ServiceState::Running));
        assert!(m.snapshot().files.is_empty(), "auth token must be removed");
    }

    #[tokio::test]
    async fn provided_password_is_applied_then_cleared() {
        let m = SimulatedMachine::new("DC01");
        m.set_domain_controller(true);
        let store = MemoryStateStore::new();
        let cfg = config();
        let expected = secret_fingerprint(&Secret::new("Correct-Horse-42!"));
        let mut request = InstallRequest::new("CORP\\svc").with_password("Correct-Horse-42!");

        let report = InstallEngine::new(&cfg, &m, &store).install(&mut request).await;
        assert!(success(&report.outcome).password_cleared);
        assert_eq!(m.user_password_fingerprint("CORP\\svc"), Some(expected));
        let pw = request.password.as_ref().unwrap();
        assert!(pw.is_cleared());
        assert!(pw.is_empty());
    }

    #[tokio::test]
    async fn reset_applies_generated_password_to_existing_user() {
        let m = SimulatedMachine::new("HOST");
        m.add_user("agentuser");
        m.add_service("agent", Path::new("C:\\old\\agent.exe"), "HOST\\agentuser");
        let store = MemoryStateStore::new();
        let cfg = config();

        let mut request = InstallRequest::default().with_reset(true);
        let report = InstallEngine::new(&cfg, &m, &store).install(&mut request).await;
        let summary = success(&report.outcome);
        assert!(summary.password_reset);
        assert!(m.user_password_fingerprint("agentuser").is_some());
        assert_eq!(
            m.service_spec("agent").map(|s| s.binary_path),
            cfg.primary_service().map(|s| s.binary_path.clone())
        );
        assert_eq!(summary.services_created, vec!["agent-trace", "agent-process"]);
    }

    #[tokio::test]
    async fn unreachable_domain_aborts_without_mutation() {
        let m = SimulatedMachine::new("HOST");
        m.set_authority_unreachable(true);
        let store = MemoryStateStore::new();
        let cfg = config();

        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::new("CORP\\svc").with_password("Correct-Horse-42!"))
            .await;
        assert!(matches!(
            report.outcome,
            InstallOutcome::Failed {
                error: InstallError::Probe { .. },
                ..
            }
        ));
        assert!(report.rollback.is_none());
        assert_eq!(m.call_count(Op::CreateUser), 0);
    }

    #[tokio::test]
    async fn concurrent_attempt_is_refused() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let cfg = config();
        let held = store.acquire_lock().await.unwrap();
        let engine = InstallEngine::new(&cfg, &m, &store);

        let report = engine.install(&mut InstallRequest::default()).await;
        assert!(matches!(
            report.outcome,
            InstallOutcome::Failed {
                error: InstallError::Journal(crate::journal::JournalError::Locked(_)),
                ..
            }
        ));
        assert!(m.calls().is_empty());
        // the refused attempt must not release someone else's lock
        assert!(store.is_locked());

        drop(held);
        success(&engine.install(&mut InstallRequest::default()).await.outcome);
        assert!(!store.is_locked());
    }

    #[tokio::test]
    async fn overall_deadline_fails_attempt_and_rollback_cleans_up() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let mut cfg = config();
        cfg.overall_timeout_secs = 1;
        let before = m.snapshot();
        m.set_latency(Op::CreateService, std::time::Duration::from_secs(30));

        let mut request = InstallRequest::default();
        let report = InstallEngine::new(&cfg, &m, &store).install(&mut request).await;
        match &report.outcome {
            InstallOutcome::Failed { error, journal } => {
                assert!(matches!(error, InstallError::Timeout { .. }));
                assert_eq!(journal.steps(), vec![JournalStep::UserCreated]);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(report.rollback, Some(RollbackOutcome::FullyUndone));
        assert_eq!(m.snapshot(), before);
    }

    #[tokio::test]
    async fn deadline_inside_service_step_leaves_no_orphaned_service() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let mut cfg = config();
        cfg.overall_timeout_secs = 1;
        let before = m.snapshot();
        m.set_latency(Op::ServiceExists, std::time::Duration::from_millis(400));

        let engine = InstallEngine::new(&cfg, &m, &store);
        let report = engine.install(&mut InstallRequest::default()).await;
        match &report.outcome {
            InstallOutcome::Failed { error, journal } => {
                assert!(matches!(error, InstallError::Timeout { .. }), "{}", error);
                assert!(journal.contains(JournalStep::UserCreated));
                assert!(journal.contains(JournalStep::ServicesInstalled));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(report.rollback, Some(RollbackOutcome::FullyUndone));
        assert_eq!(m.snapshot(), before);

        // nothing is left that would make the next attempt look like a service without a user
        m.set_latency(Op::ServiceExists, std::time::Duration::ZERO);
        let retry = engine.install(&mut InstallRequest::default()).await;
        assert_eq!(success(&retry.outcome).path, InstallPath::FreshInstall);
    }

    #[tokio::test]
    async fn service_created_without_reply_is_still_rolled_back() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let mut cfg = config();
        cfg.overall_timeout_secs = 1;
        let before = m.snapshot();
        m.set_ack_latency(Op::CreateService, std::time::Duration::from_secs(30));

        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::default())
            .await;
        match &report.outcome {
            InstallOutcome::Failed { error, journal } => {
                assert!(matches!(error, InstallError::Timeout { .. }));
                assert_eq!(
                    journal.steps(),
                    vec![JournalStep::UserCreated, JournalStep::ServicesInstalled]
                );
                assert_eq!(journal.entries()[1].service_names, vec!["agent"]);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(report.rollback, Some(RollbackOutcome::FullyUndone));
        assert_eq!(m.snapshot(), before);
    }

    #[tokio::test]
    async fn account_created_without_reply_is_still_rolled_back() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let mut cfg = config();
        cfg.overall_timeout_secs = 1;
        let before = m.snapshot();
        m.set_ack_latency(Op::CreateUser, std::time::Duration::from_secs(30));

        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::default())
            .await;
        match &report.outcome {
            InstallOutcome::Failed { error, journal } => {
                assert!(matches!(error, InstallError::Timeout { .. }));
                assert_eq!(journal.steps(), vec![JournalStep::UserCreated]);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(report.rollback, Some(RollbackOutcome::FullyUndone));
        assert_eq!(m.snapshot(), before);
    }

    #[tokio::test]
    async fn pending_journals_from_a_crash_are_rolled_back() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let cfg = config();
        let before = m.snapshot();

        // Simulate a crash between steps: journal written, process gone.
        let attempt_id = Uuid::new_v4();
        let info = m
            .create_user(
                &AccountName::parse("agentuser").unwrap(),
                &Secret::new("Correct-Horse-42!"),
                "",
            )
            .await
            .unwrap();
        store
            .append(attempt_id, &crate::journal::JournalEntry::user_created(&info))
            .await
            .unwrap();

        let engine = InstallEngine::new(&cfg, &m, &store);
        let outcomes = engine.rollback_pending().await.unwrap();
        assert_eq!(outcomes, vec![(attempt_id, RollbackOutcome::FullyUndone)]);
        assert_eq!(m.snapshot(), before);
        assert!(store.pending_attempts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn uninstall_after_install_restores_clean_machine() {
        let m = SimulatedMachine::new("HOST");
        let store = MemoryStateStore::new();
        let cfg = config();
        let before = m.snapshot();
        let engine = InstallEngine::new(&cfg, &m, &store);

        success(&engine.install(&mut InstallRequest::default()).await.outcome);
        let outcome = engine.run_uninstall().await.unwrap();
        assert_eq!(outcome, RollbackOutcome::FullyUndone);

        let mut after = m.snapshot();
        // the legacy symlink belongs to the file payload, which the installer shell removes
        after.symlinks.clear();
        assert_eq!(after, before);
        assert!(store.load_install_record().await.unwrap().is_none());
    }
}

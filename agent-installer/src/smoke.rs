// Install decision-engine smoke
//
// Runs the engine end to end against the simulated machine and an in-memory state store, one
// scenario per row of the decision table that matters operationally, and writes a transcript.
// Used for automated verification on build agents where no real OS capabilities are available.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::capability::simulated::{Op, SimulatedMachine};
use crate::capability::CapabilityError;
use crate::config::{InstallerConfig, ServiceWaitPolicy};
use crate::installation::eligibility::{EligibilityReason, InstallPath};
use crate::installation::InstallEngine;
use crate::journal::{FileStateStore, MemoryStateStore, StateStore};
use crate::models::requests::InstallRequest;
use crate::models::responses::{InstallOutcome, InstallReport, InstallReportView, RollbackOutcome};

pub const TRANSCRIPT_FILE: &str = "install_smoke_transcript.log";
const SMOKE_STATE_DIR: &str = "install_smoke_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Success(InstallPath),
    Rejected(EligibilityReason),
    RolledBack,
}

struct Transcript {
    lines: Vec<String>,
    failures: usize,
}

impl Transcript {
    fn push(&mut self, line: String) {
        log::info!("[PHASE: smoke] [STEP: transcript] {}", line);
        self.lines.push(line);
    }

    fn check(&mut self, scenario: &str, report: &InstallReport, expected: Expected) {
        let ok = match (&report.outcome, expected) {
            (InstallOutcome::Success(s), Expected::Success(path)) => s.path == path,
            (InstallOutcome::Rejected(r), Expected::Rejected(reason)) => *r == reason,
            (InstallOutcome::Failed { .. }, Expected::RolledBack) => {
                report.rollback == Some(RollbackOutcome::FullyUndone)
            }
            _ => false,
        };
        let view = serde_json::to_string(&InstallReportView::from(report))
            .unwrap_or_else(|_| "{}".to_string());
        self.push(format!(
            "SCENARIO {} expected={:?} ok={} report={}",
            scenario, expected, ok, view
        ));
        if !ok {
            self.failures += 1;
        }
    }

    fn assert(&mut self, scenario: &str, what: &str, ok: bool) {
        self.push(format!("ASSERT {} {} ok={}", scenario, what, ok));
        if !ok {
            self.failures += 1;
        }
    }
}

fn smoke_config(base: &InstallerConfig) -> InstallerConfig {
    InstallerConfig {
        service_wait: ServiceWaitPolicy {
            stop_timeout_ms: 2_000,
            start_timeout_ms: 2_000,
            min_poll_ms: 1,
            max_poll_ms: 10,
        },
        ..base.clone()
    }
}

/// Run every scenario; returns the transcript path and whether all expectations held.
pub async fn install_smoke(base: &InstallerConfig, out_dir: &Path) -> Result<(PathBuf, bool)> {
    let cfg = smoke_config(base);
    let mut t = Transcript {
        lines: Vec::new(),
        failures: 0,
    };
    t.push("INSTALL_SMOKE begin".to_string());

    // Fresh install, then an in-place upgrade, then uninstall, journaled on disk.
    {
        let state_dir = out_dir.join(SMOKE_STATE_DIR);
        match tokio::fs::remove_dir_all(&state_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to reset {:?}", state_dir));
            }
        }
        let m = SimulatedMachine::new("SMOKE01");
        let store = FileStateStore::new(state_dir.clone());
        let engine = InstallEngine::new(&cfg, &m, &store);
        let clean = m.snapshot();

        let report = engine.install(&mut InstallRequest::default()).await;
        t.check("fresh_install", &report, Expected::Success(InstallPath::FreshInstall));
        let installed = m.snapshot();

        let report = engine.install(&mut InstallRequest::default()).await;
        t.check("upgrade", &report, Expected::Success(InstallPath::Upgrade));
        t.assert("upgrade", "machine_unchanged", m.snapshot() == installed);

        match engine.run_uninstall().await {
            Ok(outcome) => t.assert("uninstall", "fully_undone", outcome.is_complete()),
            Err(e) => t.assert("uninstall", &format!("error={}", e), false),
        }
        let mut after = m.snapshot();
        after.symlinks.clear();
        t.assert("uninstall", "machine_clean", after == clean);

        let pending = store.pending_attempts().await.map(|p| p.len()).unwrap_or(usize::MAX);
        let record = store.load_install_record().await.map(|r| r.is_some()).unwrap_or(true);
        t.assert("uninstall", "state_dir_clean", pending == 0 && !record);
        if let Err(e) = tokio::fs::remove_dir_all(&state_dir).await {
            log::warn!(
                "[PHASE: smoke] [STEP: cleanup] Could not remove {:?}: {}",
                state_dir,
                e
            );
        }
    }

    // Domain controller without a password.
    {
        let m = SimulatedMachine::new("DC01");
        m.set_domain_controller(true);
        let store = MemoryStateStore::new();
        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::new("CORP\\agentsvc"))
            .await;
        t.check(
            "dc_missing_password",
            &report,
            Expected::Rejected(EligibilityReason::MissingPasswordForDomainInstall),
        );
        t.assert("dc_missing_password", "no_mutation", m.call_count(Op::CreateUser) == 0);
    }

    // Orphaned service.
    {
        let m = SimulatedMachine::new("SMOKE02");
        m.add_service("agent", Path::new("C:\\old\\agent.exe"), "SMOKE02\\agentuser");
        let store = MemoryStateStore::new();
        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::default())
            .await;
        t.check(
            "service_without_user",
            &report,
            Expected::Rejected(EligibilityReason::InvalidStateServiceWithoutUser),
        );
    }

    // Local account that was not created by us.
    {
        let m = SimulatedMachine::new("SMOKE03");
        m.add_user("agentuser");
        let store = MemoryStateStore::new();
        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::default())
            .await;
        t.check(
            "local_user_without_service",
            &report,
            Expected::Rejected(EligibilityReason::InvalidStateUserWithoutServiceNonDomain),
        );
    }

    // Service registration fails after the account was created.
    {
        let m = SimulatedMachine::new("SMOKE04");
        let store = MemoryStateStore::new();
        let before = m.snapshot();
        m.fail_on_target(
            Op::CreateService,
            "agent-process",
            CapabilityError::os("CreateService", "smoke-injected failure"),
        );
        let report = InstallEngine::new(&cfg, &m, &store)
            .install(&mut InstallRequest::default())
            .await;
        t.check("service_failure_rollback", &report, Expected::RolledBack);
        t.assert(
            "service_failure_rollback",
            "machine_restored",
            m.snapshot() == before,
        );
    }

    t.push(format!("INSTALL_SMOKE end failures={}", t.failures));

    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", out_dir))?;
    let transcript_path = out_dir.join(TRANSCRIPT_FILE);
    let mut body = t.lines.join("\n");
    body.push('\n');
    tokio::fs::write(&transcript_path, body)
        .await
        .with_context(|| format!("Failed to write {:?}", transcript_path))?;
    Ok((transcript_path, t.failures == 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_smoke_scenarios_pass() {
        let dir = tempfile::tempdir().unwrap();
        let (path, ok) = install_smoke(&InstallerConfig::default(), dir.path())
            .await
            .unwrap();
        let transcript = std::fs::read_to_string(path).unwrap();
        assert!(ok, "{}", transcript);
        assert!(transcript.starts_with("INSTALL_SMOKE begin"));
        assert!(transcript.contains("SCENARIO service_failure_rollback"));
        assert!(!transcript.contains("ok=false"));
    }
}

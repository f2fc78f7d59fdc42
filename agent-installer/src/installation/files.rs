//! File and registry access helpers.
//!
//! Goals:
//! - Grant the service account access to every configured resource, in a fixed order
//! - Strip by SID only, so entries for other principals (including operator customizations) survive
//! - Never fail silently (log with context)

use log::{debug, info, warn};
use std::path::Path;
use std::time::Instant;

use crate::capability::{CapabilityError, CapabilityProvider, Sid};
use crate::config::{AclTarget, ResourcePaths};
use crate::error::{InstallError, InstallStep};
use crate::models::responses::UndoFailure;

fn describe(target: &AclTarget) -> String {
    match target {
        AclTarget::File { path, .. } => path.display().to_string(),
        AclTarget::Registry { key, .. } => format!("HKLM\\{}", key),
    }
}

/// Grant `sid` access to each target. The first failure aborts.
pub async fn grant_acls(
    provider: &dyn CapabilityProvider,
    targets: &[AclTarget],
    sid: &Sid,
) -> Result<(), InstallError> {
    let started = Instant::now();
    debug!(
        "[PHASE: installation] [STEP: grant_acls] grant_acls entered (targets={}, sid={})",
        targets.len(),
        sid
    );

    for target in targets {
        let result = match target {
            AclTarget::File { path, rights } => provider.grant_file_acl(path, sid, *rights).await,
            AclTarget::Registry { key, rights } => {
                provider.grant_registry_acl(key, sid, *rights).await
            }
        };
        if let Err(e) = result {
            warn!(
                "[PHASE: installation] [STEP: grant_acls] Failed to grant access on {}: {}",
                describe(target),
                e
            );
            return Err(InstallError::capability(InstallStep::GrantAcls)(e));
        }
    }

    info!(
        "[PHASE: installation] [STEP: grant_acls] Granted access on {} resources (duration_ms={})",
        targets.len(),
        started.elapsed().as_millis()
    );
    Ok(())
}

/// Remove every entry for `sid` from each target. Continues past failures and returns them.
pub async fn strip_acls(
    provider: &dyn CapabilityProvider,
    targets: &[AclTarget],
    sid: &Sid,
) -> Vec<UndoFailure> {
    let mut failures = Vec::new();
    // Reverse of grant order.
    for target in targets.iter().rev() {
        let result = match target {
            AclTarget::File { path, .. } => provider.remove_file_acl_by_sid(path, sid).await,
            AclTarget::Registry { key, .. } => provider.remove_registry_acl_by_sid(key, sid).await,
        };
        match result {
            Ok(()) | Err(CapabilityError::NotFound(_)) => {}
            Err(e) => {
                warn!(
                    "[PHASE: rollback] [STEP: strip_acls] Failed to remove {} from {}: {}",
                    sid,
                    describe(target),
                    e
                );
                failures.push(UndoFailure::new("strip_acls", describe(target), e));
            }
        }
    }
    failures
}

/// Create the legacy symlink if one is configured. Best-effort: returns whether a link was
/// created, never fails the install.
pub async fn create_legacy_symlink(
    provider: &dyn CapabilityProvider,
    paths: &ResourcePaths,
) -> bool {
    let Some(link) = paths.legacy_link.as_deref() else {
        return false;
    };
    match provider.create_symlink(link, &paths.binary_dir).await {
        Ok(()) => {
            info!(
                "[PHASE: installation] [STEP: create_symlink] Linked {:?} -> {:?}",
                link, paths.binary_dir
            );
            true
        }
        Err(CapabilityError::AlreadyExists(_)) => {
            debug!(
                "[PHASE: installation] [STEP: create_symlink] {:?} already exists; leaving it",
                link
            );
            false
        }
        Err(e) => {
            warn!(
                "[PHASE: installation] [STEP: create_symlink] Could not create {:?} (continuing): {}",
                link, e
            );
            false
        }
    }
}

/// Delete the agent's auth token. A missing file is success.
pub async fn delete_auth_token(
    provider: &dyn CapabilityProvider,
    token_path: &Path,
) -> Option<UndoFailure> {
    match provider.delete_file(token_path).await {
        Ok(()) => {
            info!(
                "[PHASE: rollback] [STEP: delete_token] Removed auth token {:?}",
                token_path
            );
            None
        }
        Err(CapabilityError::NotFound(_)) => None,
        Err(e) => {
            warn!(
                "[PHASE: rollback] [STEP: delete_token] Failed to remove auth token {:?}: {}",
                token_path, e
            );
            Some(UndoFailure::new(
                "delete_token",
                token_path.display().to_string(),
                e,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::simulated::{Op, SimulatedMachine};
    use crate::capability::AccessRights;
    use crate::config::InstallerConfig;

    #[tokio::test]
    async fn grant_then_strip_leaves_foreign_entries() {
        let m = SimulatedMachine::new("HOST");
        let cfg = InstallerConfig::default();
        let admin = Sid("S-1-5-32-544".to_string());
        m.add_file_acl(&cfg.paths.config_dir, &admin, AccessRights::FullControl);
        let before = m.snapshot();

        let sid = m.add_user("agentuser");
        let targets = cfg.acl_targets();
        grant_acls(&m, &targets, &sid).await.unwrap();
        assert_eq!(m.call_count(Op::GrantFileAcl), 7);
        assert_eq!(m.call_count(Op::GrantRegistryAcl), 1);

        assert!(strip_acls(&m, &targets, &sid).await.is_empty());
        let after = m.snapshot();
        assert_eq!(after.file_acls, before.file_acls);
        assert_eq!(after.registry_acls, before.registry_acls);
    }

    #[tokio::test]
    async fn strip_continues_past_failures() {
        let m = SimulatedMachine::new("HOST");
        let cfg = InstallerConfig::default();
        let sid = m.add_user("agentuser");
        let targets = cfg.acl_targets();
        grant_acls(&m, &targets, &sid).await.unwrap();

        let cfg_dir = cfg.paths.config_dir.to_string_lossy().to_string();
        m.fail_on_target(Op::RemoveFileAcl, &cfg_dir, CapabilityError::os("SetNamedSecurityInfo", "denied"));
        let failures = strip_acls(&m, &targets, &sid).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].target, cfg_dir);
        // everything except the config dir entry is gone
        assert_eq!(m.snapshot().file_acls.len(), 1);
        assert!(m.snapshot().registry_acls.is_empty());
    }

    #[tokio::test]
    async fn symlink_failure_is_not_fatal() {
        let m = SimulatedMachine::new("HOST");
        let cfg = InstallerConfig::default();
        m.fail_on(Op::CreateSymlink, CapabilityError::AccessDenied("link".to_string()));
        assert!(!create_legacy_symlink(&m, &cfg.paths).await);

        m.clear_failures();
        assert!(create_legacy_symlink(&m, &cfg.paths).await);
        // second attempt sees the existing link
        assert!(!create_legacy_symlink(&m, &cfg.paths).await);
    }

    #[tokio::test]
    async fn missing_token_is_not_a_failure() {
        let m = SimulatedMachine::new("HOST");
        let cfg = InstallerConfig::default();
        assert!(delete_auth_token(&m, &cfg.paths.auth_token_file).await.is_none());

        m.add_file(&cfg.paths.auth_token_file);
        assert!(delete_auth_token(&m, &cfg.paths.auth_token_file).await.is_none());
        assert!(m.snapshot().files.is_empty());
    }
}

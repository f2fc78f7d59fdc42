// In-memory machine model implementing `CapabilityProvider`.
//
// Used by the engine's tests and by the `--install-smoke` proof mode. It models the parts of
// the OS the engine touches (SAM/AD accounts, LSA rights, builtin groups, SCM services, DACLs)
// closely enough to observe install/rollback symmetry, and supports targeted failure injection.
//
// Passwords are never stored; only a SHA-256 fingerprint is kept so tests can assert that a
// password was applied.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{
    AccessRights, AccountInfo, AccountRight, CapabilityError, CapabilityProvider, ServiceSpec,
    ServiceState, ServiceStatus, Sid, WellKnownGroup,
};
use crate::security::crypto::secret_fingerprint;
use crate::security::secret::Secret;
use crate::utils::validation::AccountName;

const DOMAIN_SID_PREFIX: &str = "S-1-5-21-1004336348-1177238915-682003330";
const SIMULATED_WAIT_HINT: Duration = Duration::from_millis(2_000);

/// Capability operations, used for failure injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    IsDomainController,
    LookupUser,
    CreateUser,
    SetUserPassword,
    DeleteUser,
    GrantRight,
    RevokeRight,
    AddToGroup,
    RemoveFromGroup,
    ServiceExists,
    CreateService,
    UpdateServiceBinaryPath,
    DeleteService,
    StartService,
    StopService,
    QueryServiceStatus,
    GrantFileAcl,
    RemoveFileAcl,
    GrantRegistryAcl,
    RemoveRegistryAcl,
    DeleteFile,
    CreateSymlink,
}

#[derive(Debug, Clone)]
struct FailureRule {
    op: Op,
    target: Option<String>,
    error: CapabilityError,
}

#[derive(Debug, Clone)]
struct SimUser {
    info: AccountInfo,
    password_fingerprint: Option<String>,
}

#[derive(Debug, Clone)]
struct SimService {
    spec: ServiceSpec,
    state: ServiceState,
    pending_polls: u32,
}

/// Observable machine state, comparable across install/rollback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MachineSnapshot {
    pub users: BTreeMap<String, Sid>,
    pub rights: BTreeMap<Sid, BTreeSet<AccountRight>>,
    pub groups: BTreeMap<WellKnownGroup, BTreeSet<Sid>>,
    pub services: BTreeMap<String, PathBuf>,
    pub file_acls: BTreeMap<PathBuf, Vec<(Sid, AccessRights)>>,
    pub registry_acls: BTreeMap<String, Vec<(Sid, AccessRights)>>,
    pub files: BTreeSet<PathBuf>,
    pub symlinks: BTreeMap<PathBuf, PathBuf>,
}

#[derive(Debug, Default)]
struct MachineState {
    is_dc: bool,
    dc_probe_fails: bool,
    authority_unreachable: bool,
    next_rid: u32,
    users: BTreeMap<String, SimUser>,
    rights: BTreeMap<Sid, BTreeSet<AccountRight>>,
    groups: BTreeMap<WellKnownGroup, BTreeSet<Sid>>,
    services: BTreeMap<String, SimService>,
    stuck_services: BTreeSet<String>,
    transition_polls: u32,
    file_acls: BTreeMap<PathBuf, Vec<(Sid, AccessRights)>>,
    registry_acls: BTreeMap<String, Vec<(Sid, AccessRights)>>,
    files: BTreeSet<PathBuf>,
    symlinks: BTreeMap<PathBuf, PathBuf>,
    failures: Vec<FailureRule>,
    delays: Vec<(Op, Duration)>,
    ack_delays: Vec<(Op, Duration)>,
    calls: Vec<(Op, String)>,
}

pub struct SimulatedMachine {
    computer_name: String,
    state: Mutex<MachineState>,
}

impl SimulatedMachine {
    pub fn new(computer_name: &str) -> Self {
        Self {
            computer_name: computer_name.to_string(),
            state: Mutex::new(MachineState {
                next_rid: 1000,
                transition_polls: 1,
                ..MachineState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(&self, name: &AccountName) -> String {
        name.qualified(&self.computer_name).to_ascii_lowercase()
    }

    /// Apply any injected latency, then record the call.
    async fn enter(
        &self,
        op: Op,
        target: &str,
    ) -> Result<MutexGuard<'_, MachineState>, CapabilityError> {
        let delay = self
            .state()
            .delays
            .iter()
            .find(|(o, _)| *o == op)
            .map(|(_, d)| *d);
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        self.enter_now(op, target)
    }

    /// Delay the reply of an operation whose effect has already been applied.
    async fn acknowledge(&self, op: Op) {
        let delay = self
            .state()
            .ack_delays
            .iter()
            .find(|(o, _)| *o == op)
            .map(|(_, d)| *d);
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }

    /// Record the call and return the injected failure for it, if any.
    fn enter_now(&self, op: Op, target: &str) -> Result<MutexGuard<'_, MachineState>, CapabilityError> {
        let mut st = self.state();
        st.calls.push((op, target.to_string()));
        let hit = st.failures.iter().find(|r| {
            r.op == op
                && r.target
                    .as_deref()
                    .map(|t| t.eq_ignore_ascii_case(target))
                    .unwrap_or(true)
        });
        if let Some(rule) = hit {
            return Err(rule.error.clone());
        }
        Ok(st)
    }

    // ------------------------------------------------------------------
    // Scenario setup
    // ------------------------------------------------------------------

    pub fn set_domain_controller(&self, is_dc: bool) {
        self.state().is_dc = is_dc;
    }

    pub fn set_dc_probe_fails(&self, fails: bool) {
        self.state().dc_probe_fails = fails;
    }

    pub fn set_authority_unreachable(&self, unreachable: bool) {
        self.state().authority_unreachable = unreachable;
    }

    /// Number of status polls a start/stop stays pending before completing.
    pub fn set_transition_polls(&self, polls: u32) {
        self.state().transition_polls = polls;
    }

    /// The named service never leaves its pending state.
    pub fn set_stuck_service(&self, name: &str) {
        self.state().stuck_services.insert(name.to_string());
    }

    /// Pre-existing account; returns its SID.
    pub fn add_user(&self, raw_name: &str) -> Sid {
        let name = AccountName::parse(raw_name).unwrap_or_else(|_| AccountName {
            domain: None,
            user: raw_name.to_string(),
        });
        let key = self.key(&name);
        let domain = name.effective_domain(&self.computer_name);
        let mut st = self.state();
        let sid = allocate_sid(&mut st);
        st.users.insert(
            key,
            SimUser {
                info: AccountInfo {
                    sid: sid.clone(),
                    username: name.user.clone(),
                    domain,
                },
                password_fingerprint: None,
            },
        );
        sid
    }

    /// Pre-existing, running service.
    pub fn add_service(&self, name: &str, binary_path: &Path, account: &str) {
        self.state().services.insert(
            name.to_string(),
            SimService {
                spec: ServiceSpec {
                    name: name.to_string(),
                    display_name: name.to_string(),
                    binary_path: binary_path.to_path_buf(),
                    dependencies: Vec::new(),
                    start_type: crate::config::StartType::Automatic,
                    account: account.to_string(),
                },
                state: ServiceState::Running,
                pending_polls: 0,
            },
        );
    }

    pub fn add_file(&self, path: &Path) {
        self.state().files.insert(path.to_path_buf());
    }

    /// Pre-existing (e.g. operator-customized) ACL entry.
    pub fn add_file_acl(&self, path: &Path, sid: &Sid, rights: AccessRights) {
        self.state()
            .file_acls
            .entry(path.to_path_buf())
            .or_default()
            .push((sid.clone(), rights));
    }

    /// Every call to `op` fails with `error`.
    pub fn fail_on(&self, op: Op, error: CapabilityError) {
        self.state().failures.push(FailureRule {
            op,
            target: None,
            error,
        });
    }

    /// Calls to `op` whose primary argument equals `target` fail with `error`.
    pub fn fail_on_target(&self, op: Op, target: &str, error: CapabilityError) {
        self.state().failures.push(FailureRule {
            op,
            target: Some(target.to_string()),
            error,
        });
    }

    /// Every call to `op` takes at least `delay`.
    pub fn set_latency(&self, op: Op, delay: Duration) {
        let mut st = self.state();
        st.delays.retain(|(o, _)| *o != op);
        st.delays.push((op, delay));
    }

    /// The operation takes effect immediately but its reply arrives after `delay`.
    pub fn set_ack_latency(&self, op: Op, delay: Duration) {
        let mut st = self.state();
        st.ack_delays.retain(|(o, _)| *o != op);
        st.ack_delays.push((op, delay));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn calls(&self) -> Vec<(Op, String)> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, op: Op) -> usize {
        self.state().calls.iter().filter(|(o, _)| *o == op).count()
    }

    pub fn reset_calls(&self) {
        self.state().calls.clear();
    }

    pub fn user_sid(&self, raw_name: &str) -> Option<Sid> {
        let name = AccountName::parse(raw_name).ok()?;
        let key = self.key(&name);
        self.state().users.get(&key).map(|u| u.info.sid.clone())
    }

    pub fn user_password_fingerprint(&self, raw_name: &str) -> Option<String> {
        let name = AccountName::parse(raw_name).ok()?;
        let key = self.key(&name);
        self.state()
            .users
            .get(&key)
            .and_then(|u| u.password_fingerprint.clone())
    }

    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.state().services.get(name).map(|s| s.state)
    }

    pub fn service_spec(&self, name: &str) -> Option<ServiceSpec> {
        self.state().services.get(name).map(|s| s.spec.clone())
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        let st = self.state();
        MachineSnapshot {
            users: st
                .users
                .iter()
                .map(|(k, u)| (k.clone(), u.info.sid.clone()))
                .collect(),
            rights: st.rights.clone(),
            groups: st.groups.clone(),
            services: st
                .services
                .iter()
                .map(|(k, s)| (k.clone(), s.spec.binary_path.clone()))
                .collect(),
            file_acls: st.file_acls.clone(),
            registry_acls: st.registry_acls.clone(),
            files: st.files.clone(),
            symlinks: st.symlinks.clone(),
        }
    }
}

fn allocate_sid(st: &mut MachineState) -> Sid {
    st.next_rid += 1;
    Sid(format!("{}-{}", DOMAIN_SID_PREFIX, st.next_rid))
}

fn advance(svc: &mut SimService, stuck: bool) {
    if stuck {
        return;
    }
    if svc.pending_polls > 0 {
        svc.pending_polls -= 1;
        return;
    }
    svc.state = match svc.state {
        ServiceState::StartPending => ServiceState::Running,
        ServiceState::StopPending => ServiceState::Stopped,
        other => other,
    };
}

#[async_trait]
impl CapabilityProvider for SimulatedMachine {
    fn computer_name(&self) -> String {
        self.computer_name.clone()
    }

    async fn is_domain_controller(&self) -> Result<bool, CapabilityError> {
        let st = self.enter(Op::IsDomainController, "").await?;
        if st.dc_probe_fails {
            return Err(CapabilityError::os(
                "DsRoleGetPrimaryDomainInformation",
                "RPC server unavailable",
            ));
        }
        Ok(st.is_dc)
    }

    async fn lookup_user(&self, name: &AccountName) -> Result<AccountInfo, CapabilityError> {
        let key = self.key(name);
        let st = self.enter(Op::LookupUser, &key).await?;
        if st.authority_unreachable && name.is_domain_qualified(&self.computer_name) {
            return Err(CapabilityError::Unreachable(name.to_string()));
        }
        st.users
            .get(&key)
            .map(|u| u.info.clone())
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))
    }

    async fn create_user(
        &self,
        name: &AccountName,
        password: &Secret,
        _comment: &str,
    ) -> Result<AccountInfo, CapabilityError> {
        let key = self.key(name);
        let info = {
            let mut st = self.enter(Op::CreateUser, &key).await?;
            if st.users.contains_key(&key) {
                return Err(CapabilityError::AlreadyExists(name.to_string()));
            }
            if name.is_domain_qualified(&self.computer_name) && !st.is_dc {
                return Err(CapabilityError::AccessDenied(format!(
                    "cannot create domain account {} from a member server",
                    name
                )));
            }
            let info = AccountInfo {
                sid: allocate_sid(&mut st),
                username: name.user.clone(),
                domain: name.effective_domain(&self.computer_name),
            };
            st.users.insert(
                key,
                SimUser {
                    info: info.clone(),
                    password_fingerprint: Some(secret_fingerprint(password)),
                },
            );
            info
        };
        self.acknowledge(Op::CreateUser).await;
        Ok(info)
    }

    async fn set_user_password(
        &self,
        name: &AccountName,
        password: &Secret,
    ) -> Result<(), CapabilityError> {
        let key = self.key(name);
        let mut st = self.enter(Op::SetUserPassword, &key).await?;
        let user = st
            .users
            .get_mut(&key)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?;
        user.password_fingerprint = Some(secret_fingerprint(password));
        Ok(())
    }

    async fn delete_user(&self, name: &AccountName) -> Result<(), CapabilityError> {
        let key = self.key(name);
        let mut st = self.enter(Op::DeleteUser, &key).await?;
        st.users
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))
    }

    async fn grant_right(&self, sid: &Sid, right: AccountRight) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::GrantRight, right.lsa_name()).await?;
        st.rights.entry(sid.clone()).or_default().insert(right);
        Ok(())
    }

    async fn revoke_right(&self, sid: &Sid, right: AccountRight) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::RevokeRight, right.lsa_name()).await?;
        if let Some(held) = st.rights.get_mut(sid) {
            held.remove(&right);
            if held.is_empty() {
                st.rights.remove(sid);
            }
        }
        Ok(())
    }

    async fn add_to_group(&self, sid: &Sid, group: WellKnownGroup) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::AddToGroup, &group.sid().0).await?;
        if !st.groups.entry(group).or_default().insert(sid.clone()) {
            return Err(CapabilityError::AlreadyMember(format!("{:?}", group)));
        }
        Ok(())
    }

    async fn remove_from_group(
        &self,
        sid: &Sid,
        group: WellKnownGroup,
    ) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::RemoveFromGroup, &group.sid().0).await?;
        let removed = match st.groups.get_mut(&group) {
            Some(members) => {
                let removed = members.remove(sid);
                if members.is_empty() {
                    st.groups.remove(&group);
                }
                removed
            }
            None => false,
        };
        if !removed {
            return Err(CapabilityError::NotMember(format!("{:?}", group)));
        }
        Ok(())
    }

    async fn service_exists(&self, name: &str) -> Result<bool, CapabilityError> {
        let st = self.enter(Op::ServiceExists, name).await?;
        Ok(st.services.contains_key(name))
    }

    async fn create_service(
        &self,
        spec: &ServiceSpec,
        _password: Option<&Secret>,
    ) -> Result<(), CapabilityError> {
        {
            let mut st = self.enter(Op::CreateService, &spec.name).await?;
            if st.services.contains_key(&spec.name) {
                return Err(CapabilityError::AlreadyExists(spec.name.clone()));
            }
            st.services.insert(
                spec.name.clone(),
                SimService {
                    spec: spec.clone(),
                    state: ServiceState::Stopped,
                    pending_polls: 0,
                },
            );
        }
        self.acknowledge(Op::CreateService).await;
        Ok(())
    }

    async fn update_service_binary_path(
        &self,
        name: &str,
        binary_path: &Path,
    ) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::UpdateServiceBinaryPath, name).await?;
        let svc = st
            .services
            .get_mut(name)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?;
        svc.spec.binary_path = binary_path.to_path_buf();
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::DeleteService, name).await?;
        st.services
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))
    }

    async fn start_service(&self, name: &str) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::StartService, name).await?;
        let polls = st.transition_polls;
        let svc = st
            .services
            .get_mut(name)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?;
        if svc.state != ServiceState::Running {
            svc.state = ServiceState::StartPending;
            svc.pending_polls = polls;
        }
        Ok(())
    }

    async fn stop_service(&self, name: &str) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::StopService, name).await?;
        let polls = st.transition_polls;
        let svc = st
            .services
            .get_mut(name)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?;
        if svc.state != ServiceState::Stopped {
            svc.state = ServiceState::StopPending;
            svc.pending_polls = polls;
        }
        Ok(())
    }

    async fn query_service_status(&self, name: &str) -> Result<ServiceStatus, CapabilityError> {
        let mut st = self.enter(Op::QueryServiceStatus, name).await?;
        let stuck = st.stuck_services.contains(name);
        let svc = st
            .services
            .get_mut(name)
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))?;
        let status = ServiceStatus {
            state: svc.state,
            wait_hint: SIMULATED_WAIT_HINT,
        };
        advance(svc, stuck);
        Ok(status)
    }

    async fn grant_file_acl(
        &self,
        path: &Path,
        sid: &Sid,
        rights: AccessRights,
    ) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::GrantFileAcl, &path.to_string_lossy()).await?;
        let acl = st.file_acls.entry(path.to_path_buf()).or_default();
        if !acl.iter().any(|(s, r)| s == sid && *r == rights) {
            acl.push((sid.clone(), rights));
        }
        Ok(())
    }

    async fn remove_file_acl_by_sid(&self, path: &Path, sid: &Sid) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::RemoveFileAcl, &path.to_string_lossy()).await?;
        if let Some(acl) = st.file_acls.get_mut(path) {
            acl.retain(|(s, _)| s != sid);
            if acl.is_empty() {
                st.file_acls.remove(path);
            }
        }
        Ok(())
    }

    async fn grant_registry_acl(
        &self,
        key: &str,
        sid: &Sid,
        rights: AccessRights,
    ) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::GrantRegistryAcl, key).await?;
        let acl = st.registry_acls.entry(key.to_string()).or_default();
        if !acl.iter().any(|(s, r)| s == sid && *r == rights) {
            acl.push((sid.clone(), rights));
        }
        Ok(())
    }

    async fn remove_registry_acl_by_sid(
        &self,
        key: &str,
        sid: &Sid,
    ) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::RemoveRegistryAcl, key).await?;
        if let Some(acl) = st.registry_acls.get_mut(key) {
            acl.retain(|(s, _)| s != sid);
            if acl.is_empty() {
                st.registry_acls.remove(key);
            }
        }
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::DeleteFile, &path.to_string_lossy()).await?;
        if !st.files.remove(path) {
            return Err(CapabilityError::NotFound(path.display().to_string()));
        }
        Ok(())
    }

    async fn create_symlink(&self, link: &Path, target: &Path) -> Result<(), CapabilityError> {
        let mut st = self.enter(Op::CreateSymlink, &link.to_string_lossy()).await?;
        if st.symlinks.contains_key(link) {
            return Err(CapabilityError::AlreadyExists(link.display().to_string()));
        }
        st.symlinks.insert(link.to_path_buf(), target.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_distinguishes_missing_from_unreachable() {
        let m = SimulatedMachine::new("HOST");
        let local = AccountName::parse("agentuser").unwrap();
        let domain = AccountName::parse("CORP\\agentuser").unwrap();

        assert!(m.lookup_user(&local).await.unwrap_err().is_not_found());

        m.set_authority_unreachable(true);
        assert!(matches!(
            m.lookup_user(&domain).await,
            Err(CapabilityError::Unreachable(_))
        ));
        // local lookups never need the domain authority
        assert!(m.lookup_user(&local).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn created_user_keeps_only_a_password_fingerprint() {
        let m = SimulatedMachine::new("HOST");
        let name = AccountName::parse("agentuser").unwrap();
        let pw = Secret::new("Abcdef12!!xyZ");
        m.create_user(&name, &pw, "comment").await.unwrap();

        let fp = m.user_password_fingerprint("agentuser").unwrap();
        assert_eq!(fp, secret_fingerprint(&pw));
        assert!(!fp.contains("Abcdef12"));
    }

    #[tokio::test]
    async fn group_membership_reports_already_member() {
        let m = SimulatedMachine::new("HOST");
        let sid = m.add_user("agentuser");
        m.add_to_group(&sid, WellKnownGroup::EventLogReaders).await.unwrap();
        assert!(matches!(
            m.add_to_group(&sid, WellKnownGroup::EventLogReaders).await,
            Err(CapabilityError::AlreadyMember(_))
        ));
    }

    #[tokio::test]
    async fn acl_removal_by_sid_preserves_other_entries() {
        let m = SimulatedMachine::new("HOST");
        let admin = Sid("S-1-5-32-544".to_string());
        let ours = m.add_user("agentuser");
        let p = PathBuf::from(r"C:\ProgramData\Agent");
        m.add_file_acl(&p, &admin, AccessRights::FullControl);

        m.grant_file_acl(&p, &ours, AccessRights::Modify).await.unwrap();
        m.grant_file_acl(&p, &ours, AccessRights::Modify).await.unwrap();
        assert_eq!(m.snapshot().file_acls[&p].len(), 2);

        m.remove_file_acl_by_sid(&p, &ours).await.unwrap();
        assert_eq!(
            m.snapshot().file_acls[&p],
            vec![(admin, AccessRights::FullControl)]
        );
    }

    #[tokio::test]
    async fn targeted_failure_only_hits_matching_calls() {
        let m = SimulatedMachine::new("HOST");
        m.fail_on_target(Op::DeleteService, "agent-trace", CapabilityError::os("delete", "busy"));
        m.add_service("agent", Path::new("a.exe"), "HOST\\agentuser");
        m.add_service("agent-trace", Path::new("t.exe"), "HOST\\agentuser");

        assert!(m.delete_service("agent").await.is_ok());
        assert!(m.delete_service("agent-trace").await.is_err());
        assert_eq!(m.call_count(Op::DeleteService), 2);
    }

    #[tokio::test]
    async fn stop_transitions_through_pending() {
        let m = SimulatedMachine::new("HOST");
        m.add_service("agent", Path::new("a.exe"), "HOST\\agentuser");
        m.stop_service("agent").await.unwrap();

        let first = m.query_service_status("agent").await.unwrap();
        assert_eq!(first.state, ServiceState::StopPending);
        let _ = m.query_service_status("agent").await.unwrap();
        let last = m.query_service_status("agent").await.unwrap();
        assert_eq!(last.state, ServiceState::Stopped);
    }
}

// Capability Provider — the OS seam.
//
// Everything the engine does to the machine (accounts, rights, groups, services, ACLs, files)
// goes through `CapabilityProvider`. The engine itself is platform-neutral; platform shims and
// the in-memory `SimulatedMachine` implement the trait.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::config::StartType;
use crate::security::secret::Secret;
use crate::utils::validation::AccountName;

/// Security identifier in string form (`S-1-5-21-...`). Identity comparisons in rollback and
/// uninstall are done on SIDs, never on account names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sid(pub String);

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub sid: Sid,
    pub username: String,
    pub domain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRight {
    DenyInteractiveLogon,
    DenyNetworkLogon,
    DenyRemoteInteractiveLogon,
    ServiceLogon,
}

impl AccountRight {
    pub const ALL: [AccountRight; 4] = [
        AccountRight::DenyInteractiveLogon,
        AccountRight::DenyNetworkLogon,
        AccountRight::DenyRemoteInteractiveLogon,
        AccountRight::ServiceLogon,
    ];

    /// LSA privilege constant name.
    pub fn lsa_name(self) -> &'static str {
        match self {
            AccountRight::DenyInteractiveLogon => "SeDenyInteractiveLogonRight",
            AccountRight::DenyNetworkLogon => "SeDenyNetworkLogonRight",
            AccountRight::DenyRemoteInteractiveLogon => "SeDenyRemoteInteractiveLogonRight",
            AccountRight::ServiceLogon => "SeServiceLogonRight",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WellKnownGroup {
    PerformanceMonitorUsers,
    EventLogReaders,
}

impl WellKnownGroup {
    pub const ALL: [WellKnownGroup; 2] = [
        WellKnownGroup::PerformanceMonitorUsers,
        WellKnownGroup::EventLogReaders,
    ];

    /// Builtin alias SID; stable across OS languages, unlike the display name.
    pub fn sid(self) -> Sid {
        match self {
            WellKnownGroup::PerformanceMonitorUsers => Sid("S-1-5-32-558".to_string()),
            WellKnownGroup::EventLogReaders => Sid("S-1-5-32-573".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRights {
    Read,
    ReadExecute,
    Modify,
    FullControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: ServiceState,
    /// Service-reported estimate for the pending transition.
    pub wait_hint: Duration,
}

/// Registration request for one OS service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub display_name: String,
    pub binary_path: std::path::PathBuf,
    pub dependencies: Vec<String>,
    pub start_type: StartType,
    /// `DOMAIN\user` the service logs on as.
    pub account: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("already a member: {0}")]
    AlreadyMember(String),
    #[error("not a member: {0}")]
    NotMember(String),
    #[error("account authority unreachable: {0}")]
    Unreachable(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("{operation} failed: {message}")]
    Os { operation: String, message: String },
}

impl CapabilityError {
    pub fn os(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CapabilityError::Os {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CapabilityError::NotFound(_))
    }
}

/// Everything the engine is allowed to do to the machine.
///
/// Implementations must be idempotent where noted: re-granting a held right is success,
/// and group membership that already exists is reported as `AlreadyMember`, which the
/// engine treats as success.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// NetBIOS computer name; qualifies local accounts.
    fn computer_name(&self) -> String;

    async fn is_domain_controller(&self) -> Result<bool, CapabilityError>;

    /// `NotFound` when the account does not exist; `Unreachable` when the authority cannot be
    /// asked.
    async fn lookup_user(&self, name: &AccountName) -> Result<AccountInfo, CapabilityError>;
    /// Create the account and resolve it, so the caller learns the SID without a second
    /// lookup that could fail after the account already exists.
    async fn create_user(
        &self,
        name: &AccountName,
        password: &Secret,
        comment: &str,
    ) -> Result<AccountInfo, CapabilityError>;
    async fn set_user_password(
        &self,
        name: &AccountName,
        password: &Secret,
    ) -> Result<(), CapabilityError>;
    async fn delete_user(&self, name: &AccountName) -> Result<(), CapabilityError>;

    async fn grant_right(&self, sid: &Sid, right: AccountRight) -> Result<(), CapabilityError>;
    async fn revoke_right(&self, sid: &Sid, right: AccountRight) -> Result<(), CapabilityError>;

    async fn add_to_group(&self, sid: &Sid, group: WellKnownGroup) -> Result<(), CapabilityError>;
    async fn remove_from_group(
        &self,
        sid: &Sid,
        group: WellKnownGroup,
    ) -> Result<(), CapabilityError>;

    async fn service_exists(&self, name: &str) -> Result<bool, CapabilityError>;
    async fn create_service(
        &self,
        spec: &ServiceSpec,
        password: Option<&Secret>,
    ) -> Result<(), CapabilityError>;
    async fn update_service_binary_path(
        &self,
        name: &str,
        binary_path: &Path,
    ) -> Result<(), CapabilityError>;
    async fn delete_service(&self, name: &str) -> Result<(), CapabilityError>;
    /// Issue a start control; does not wait. See `installation::service` for waiting.
    async fn start_service(&self, name: &str) -> Result<(), CapabilityError>;
    /// Issue a stop control; does not wait.
    async fn stop_service(&self, name: &str) -> Result<(), CapabilityError>;
    async fn query_service_status(&self, name: &str) -> Result<ServiceStatus, CapabilityError>;

    /// Add an allow entry for `sid`; existing entries are preserved.
    async fn grant_file_acl(
        &self,
        path: &Path,
        sid: &Sid,
        rights: AccessRights,
    ) -> Result<(), CapabilityError>;
    /// Remove every explicit entry for `sid`; other entries are preserved.
    async fn remove_file_acl_by_sid(&self, path: &Path, sid: &Sid) -> Result<(), CapabilityError>;
    async fn grant_registry_acl(
        &self,
        key: &str,
        sid: &Sid,
        rights: AccessRights,
    ) -> Result<(), CapabilityError>;
    async fn remove_registry_acl_by_sid(&self, key: &str, sid: &Sid)
        -> Result<(), CapabilityError>;

    async fn delete_file(&self, path: &Path) -> Result<(), CapabilityError>;
    async fn create_symlink(&self, link: &Path, target: &Path) -> Result<(), CapabilityError>;
}

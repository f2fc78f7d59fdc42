// Installer configuration
//
// One immutable `InstallerConfig` is built at startup and passed by reference into every
// component. Layering (later wins):
//   1. compiled-in defaults
//   2. optional TOML file (`--config <path>`)
//   3. environment variables `AGENT_INSTALLER__<SECTION>__<KEY>`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::{AccessRights, AccountRight, WellKnownGroup};
use crate::utils::path_resolver::default_state_folder;

pub const ENV_PREFIX: &str = "AGENT_INSTALLER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartType {
    Automatic,
    Manual,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub display_name: String,
    pub binary_path: PathBuf,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub start_type: StartType,
}

/// Resources the service account is granted access to (and stripped from on rollback).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePaths {
    pub install_dir: PathBuf,
    pub binary_dir: PathBuf,
    pub embedded_dirs: Vec<PathBuf>,
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: PathBuf,
    pub auth_token_file: PathBuf,
    pub registry_root: String,
    /// Legacy location kept as a symlink to `binary_dir` for older tooling.
    pub legacy_link: Option<PathBuf>,
}

impl Default for ResourcePaths {
    fn default() -> Self {
        let install_dir = PathBuf::from(r"C:\Program Files\Agent");
        let config_dir = PathBuf::from(r"C:\ProgramData\Agent");
        let log_dir = config_dir.join("logs");
        Self {
            binary_dir: install_dir.join("bin"),
            embedded_dirs: vec![install_dir.join("embedded2"), install_dir.join("embedded3")],
            log_file: log_dir.join("agent.log"),
            auth_token_file: config_dir.join("auth_token"),
            registry_root: r"SOFTWARE\Agent".to_string(),
            legacy_link: Some(install_dir.join("agent")),
            install_dir,
            config_dir,
            log_dir,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceWaitPolicy {
    pub stop_timeout_ms: u64,
    pub start_timeout_ms: u64,
    pub min_poll_ms: u64,
    pub max_poll_ms: u64,
}

impl Default for ServiceWaitPolicy {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 30_000,
            start_timeout_ms: 30_000,
            min_poll_ms: 1_000,
            max_poll_ms: 10_000,
        }
    }
}

impl ServiceWaitPolicy {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Poll interval derived from the service's reported wait hint: one tenth of the hint,
    /// clamped to `[min_poll, max_poll]`.
    pub fn poll_interval(&self, wait_hint: Duration) -> Duration {
        let min = Duration::from_millis(self.min_poll_ms);
        let max = Duration::from_millis(self.max_poll_ms.max(self.min_poll_ms));
        (wait_hint / 10).clamp(min, max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub product_name: String,
    pub default_username: String,
    pub account_comment: String,
    pub primary_service: String,
    pub rights: Vec<AccountRight>,
    pub groups: Vec<WellKnownGroup>,
    pub overall_timeout_secs: u64,
    pub state_dir: PathBuf,
    pub password_max_attempts: u32,
    // Tables last so the TOML rendering stays valid.
    pub services: Vec<ServiceDefinition>,
    pub paths: ResourcePaths,
    pub service_wait: ServiceWaitPolicy,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        let paths = ResourcePaths::default();
        let bin = paths.binary_dir.clone();
        Self {
            product_name: "Agent".to_string(),
            default_username: "agentuser".to_string(),
            account_comment: "User context under which the Agent service runs".to_string(),
            primary_service: "agent".to_string(),
            services: vec![
                ServiceDefinition {
                    name: "agent".to_string(),
                    display_name: "Agent".to_string(),
                    binary_path: bin.join("agent.exe"),
                    dependencies: Vec::new(),
                    start_type: StartType::Automatic,
                },
                ServiceDefinition {
                    name: "agent-trace".to_string(),
                    display_name: "Agent Trace Collector".to_string(),
                    binary_path: bin.join("agent").join("trace-agent.exe"),
                    dependencies: vec!["agent".to_string()],
                    start_type: StartType::Manual,
                },
                ServiceDefinition {
                    name: "agent-process".to_string(),
                    display_name: "Agent Process Collector".to_string(),
                    binary_path: bin.join("agent").join("process-agent.exe"),
                    dependencies: vec!["agent".to_string()],
                    start_type: StartType::Manual,
                },
            ],
            paths,
            rights: AccountRight::ALL.to_vec(),
            groups: WellKnownGroup::ALL.to_vec(),
            service_wait: ServiceWaitPolicy::default(),
            overall_timeout_secs: 600,
            state_dir: default_state_folder(),
            password_max_attempts: crate::security::password::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// A resource the account gets an ACL entry on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclTarget {
    File { path: PathBuf, rights: AccessRights },
    Registry { key: String, rights: AccessRights },
}

impl InstallerConfig {
    /// Load defaults, then `path` (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&InstallerConfig::default())
            .context("Failed to serialize default installer config")?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(p) = path {
            builder = builder.add_source(config::File::from(p.to_path_buf()).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let cfg: InstallerConfig = builder
            .build()
            .context("Failed to build installer config")?
            .try_deserialize()
            .context("Failed to deserialize installer config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            anyhow::bail!("At least one service must be configured");
        }
        if self.primary_service().is_none() {
            anyhow::bail!(
                "Primary service '{}' is not in the configured service list",
                self.primary_service
            );
        }
        if self.overall_timeout_secs == 0 {
            anyhow::bail!("overall_timeout_secs must be greater than zero");
        }
        if self.service_wait.stop_timeout_ms == 0 || self.service_wait.start_timeout_ms == 0 {
            anyhow::bail!("Service wait timeouts must be greater than zero");
        }
        if self.password_max_attempts == 0 {
            anyhow::bail!("password_max_attempts must be greater than zero");
        }
        Ok(())
    }

    pub fn primary_service(&self) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == self.primary_service)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    /// Fixed list of resources the account is granted access to, in grant order.
    pub fn acl_targets(&self) -> Vec<AclTarget> {
        let p = &self.paths;
        let mut targets = vec![AclTarget::File {
            path: p.install_dir.clone(),
            rights: AccessRights::ReadExecute,
        }];
        targets.extend(p.embedded_dirs.iter().map(|d| AclTarget::File {
            path: d.clone(),
            rights: AccessRights::ReadExecute,
        }));
        targets.push(AclTarget::File {
            path: p.config_dir.clone(),
            rights: AccessRights::Modify,
        });
        targets.push(AclTarget::File {
            path: p.log_dir.clone(),
            rights: AccessRights::FullControl,
        });
        targets.push(AclTarget::File {
            path: p.log_file.clone(),
            rights: AccessRights::FullControl,
        });
        targets.push(AclTarget::File {
            path: p.auth_token_file.clone(),
            rights: AccessRights::FullControl,
        });
        targets.push(AclTarget::Registry {
            key: p.registry_root.clone(),
            rights: AccessRights::FullControl,
        });
        targets
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render config as TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = InstallerConfig::default();
        cfg.validate().expect("defaults must validate");
        assert_eq!(cfg.primary_service().map(|s| s.name.as_str()), Some("agent"));
        assert_eq!(cfg.rights.len(), 4);
        assert_eq!(cfg.groups.len(), 2);
    }

    #[test]
    fn poll_interval_scales_with_wait_hint_and_clamps() {
        let p = ServiceWaitPolicy::default();
        assert_eq!(p.poll_interval(Duration::from_secs(0)), Duration::from_secs(1));
        assert_eq!(p.poll_interval(Duration::from_secs(30)), Duration::from_secs(3));
        assert_eq!(p.poll_interval(Duration::from_secs(500)), Duration::from_secs(10));
    }

    #[test]
    fn acl_targets_cover_every_resource_once() {
        let cfg = InstallerConfig::default();
        let targets = cfg.acl_targets();
        // install dir + 2 embedded + config + log dir + log file + token + registry
        assert_eq!(targets.len(), 8);
        assert!(targets.iter().any(|t| matches!(
            t,
            AclTarget::File { path, .. } if path == &cfg.paths.auth_token_file
        )));
        assert!(matches!(targets.last(), Some(AclTarget::Registry { .. })));
    }

    #[test]
    fn validate_rejects_unknown_primary_service() {
        let cfg = InstallerConfig {
            primary_service: "missing".to_string(),
            ..InstallerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_overlays_toml_file_on_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
default_username = "svc-agent"
overall_timeout_secs = 120

[service_wait]
stop_timeout_ms = 5000
"#
        )
        .unwrap();

        let cfg = InstallerConfig::load(Some(file.path())).expect("config should load");
        assert_eq!(cfg.default_username, "svc-agent");
        assert_eq!(cfg.overall_timeout_secs, 120);
        assert_eq!(cfg.service_wait.stop_timeout_ms, 5000);
        // untouched sections keep defaults
        assert_eq!(cfg.service_wait.max_poll_ms, 10_000);
        assert_eq!(cfg.services.len(), 3);
    }

    #[test]
    fn toml_rendering_lists_primary_service() {
        let cfg = InstallerConfig::default();
        let rendered = cfg.to_toml_string().unwrap();
        assert!(rendered.contains("primary_service = \"agent\""));
    }
}

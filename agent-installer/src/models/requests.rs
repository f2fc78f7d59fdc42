// Install request models

use crate::security::secret::Secret;

/// What the operator asked for. The password (when given) is cleared by the engine as soon as
/// the last step that needs it has run; callers can check `Secret::is_cleared` afterwards.
#[derive(Debug, Default)]
pub struct InstallRequest {
    /// `DOMAIN\user`, `user@domain`, `.\user` or bare `user`. `None` uses the configured default.
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub reset_password: bool,
}

impl InstallRequest {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password));
        self
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset_password = reset;
        self
    }

    /// A usable password was supplied (and has not been consumed yet).
    pub fn has_password(&self) -> bool {
        self.password
            .as_ref()
            .map(|p| !p.is_cleared() && !p.is_empty())
            .unwrap_or(false)
    }

    pub fn username_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(default)
    }
}

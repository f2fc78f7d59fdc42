// Input validation utilities
//
// Account names arrive from the installer command line in several shapes:
//   DOMAIN\user, user@domain.fqdn, .\user, user
// They are parsed once into an `AccountName` and carried through the engine in that form.

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parsed service-account name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountName {
    /// `None` for a bare `user`; `"."` for `.\user`.
    pub domain: Option<String>,
    pub user: String,
}

impl AccountName {
    /// Parse and validate an account name.
    ///
    /// Security: names are later handed to OS account APIs, so the characters Windows reserves
    /// in SAM account names are rejected here rather than passed through.
    pub fn parse(raw: &str) -> Result<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Account name cannot be empty"));
        }

        let (domain, user) = if let Some((d, u)) = s.split_once('\\') {
            (Some(d.trim().to_string()), u.trim().to_string())
        } else if let Some((u, d)) = s.split_once('@') {
            (Some(d.trim().to_string()), u.trim().to_string())
        } else {
            (None, s.to_string())
        };

        let user_re = Regex::new(r#"^[^"/\\\[\]:;|=,+*?<>@]{1,20}$"#).map_err(|e| {
            anyhow::anyhow!("Internal error: failed to compile account regex: {}", e)
        })?;
        if !user_re.is_match(&user) || user.ends_with('.') {
            return Err(anyhow::anyhow!("Invalid account user name: '{}'", user));
        }

        if let Some(d) = &domain {
            let domain_re = Regex::new(r"^(\.|[A-Za-z0-9][A-Za-z0-9.\-_]{0,254})$").map_err(|e| {
                anyhow::anyhow!("Internal error: failed to compile domain regex: {}", e)
            })?;
            if !domain_re.is_match(d) {
                return Err(anyhow::anyhow!("Invalid account domain: '{}'", d));
            }
        }

        Ok(Self { domain, user })
    }

    /// True when the account belongs to a domain rather than to `computer_name`'s local SAM.
    pub fn is_domain_qualified(&self, computer_name: &str) -> bool {
        match &self.domain {
            None => false,
            Some(d) if d == "." => false,
            Some(d) => {
                let first_label = d.split('.').next().unwrap_or(d);
                !d.eq_ignore_ascii_case(computer_name)
                    && !first_label.eq_ignore_ascii_case(computer_name)
            }
        }
    }

    /// Domain to record for this account; local accounts resolve to the computer name.
    pub fn effective_domain(&self, computer_name: &str) -> String {
        match &self.domain {
            Some(d) if d != "." => d.clone(),
            _ => computer_name.to_string(),
        }
    }

    /// `DOMAIN\user` form, with local accounts qualified by the computer name.
    pub fn qualified(&self, computer_name: &str) -> String {
        format!("{}\\{}", self.effective_domain(computer_name), self.user)
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(d) => write!(f, "{}\\{}", d, self.user),
            None => write!(f, "{}", self.user),
        }
    }
}

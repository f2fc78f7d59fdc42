// Machine facts (in-memory)
//
// NOTE: This is NOT persisted; it is the snapshot the State Probe produces for one attempt and
// the only input the eligibility decision sees.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineFacts {
    pub is_domain_controller: bool,
    pub user_exists: bool,
    pub service_exists: bool,
    /// The requested account names a domain other than this machine.
    pub is_domain_user: bool,
}

impl MachineFacts {
    /// Fresh machine: nothing installed, local account.
    pub fn clean() -> Self {
        Self::default()
    }
}

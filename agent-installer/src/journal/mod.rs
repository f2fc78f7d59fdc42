// Rollback journal and install record persistence.
//
// The journal is the only on-disk artifact an install attempt produces:
// - keyed by an attempt id (uuid v4)
// - append-only; an entry is persisted before the sequencer moves to the next step
// - read back in order by the rollback driver, then cleared
//
// The install record is written once on success so uninstall knows which account the
// installer owns.

pub mod file_store;
pub mod memory_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::capability::{AccountInfo, Sid};

pub use file_store::FileStateStore;
pub use memory_store::MemoryStateStore;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O failed ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("journal entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("journal {path:?} is corrupt at line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("another install attempt holds the installer lock ({0})")]
    Locked(String),
}

impl JournalError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        JournalError::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStep {
    UserCreated,
    ServicesInstalled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub step: JournalStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_sid: Option<Sid>,
    #[serde(default)]
    pub services_installed: bool,
    /// Services this attempt registered (only these are removed on rollback).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_names: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn user_created(account: &AccountInfo) -> Self {
        Self {
            step: JournalStep::UserCreated,
            created_username: Some(account.username.clone()),
            created_domain: Some(account.domain.clone()),
            created_sid: Some(account.sid.clone()),
            services_installed: false,
            service_names: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn services_installed(names: Vec<String>) -> Self {
        Self {
            step: JournalStep::ServicesInstalled,
            created_username: None,
            created_domain: None,
            created_sid: None,
            services_installed: true,
            service_names: names,
            recorded_at: Utc::now(),
        }
    }
}

/// In-memory view of one attempt's journal. Only `JournalWriter` can append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackJournal {
    attempt_id: Uuid,
    entries: Vec<JournalEntry>,
}

impl RollbackJournal {
    pub fn new(attempt_id: Uuid) -> Self {
        Self {
            attempt_id,
            entries: Vec::new(),
        }
    }

    /// Rebuild from persisted entries (rollback driver in a later process).
    pub fn from_entries(attempt_id: Uuid, entries: Vec<JournalEntry>) -> Self {
        Self {
            attempt_id,
            entries,
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn steps(&self) -> Vec<JournalStep> {
        self.entries.iter().map(|e| e.step).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, step: JournalStep) -> bool {
        self.entries.iter().any(|e| e.step == step)
    }
}

/// Persisted on successful install; consumed by uninstall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub attempt_id: Uuid,
    pub username: String,
    pub domain: String,
    pub sid: Sid,
    /// True when this installer created the account (and may therefore delete it).
    pub created_user: bool,
    pub installed_at: DateTime<Utc>,
}

/// Exclusive hold on the installer state; released on drop.
pub struct StoreLock {
    handle: LockHandle,
}

enum LockHandle {
    File(PathBuf),
    Flag(Arc<AtomicBool>),
}

impl StoreLock {
    pub(crate) fn file(path: PathBuf) -> Self {
        Self {
            handle: LockHandle::File(path),
        }
    }

    pub(crate) fn flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            handle: LockHandle::Flag(flag),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        match &self.handle {
            LockHandle::File(path) => {
                if let Err(e) = std::fs::remove_file(path) {
                    log::warn!(
                        "[PHASE: journal] [STEP: unlock] Failed to remove lock file {:?}: {}",
                        path,
                        e
                    );
                }
            }
            LockHandle::Flag(flag) => flag.store(false, Ordering::SeqCst),
        }
    }
}

/// Durable store for rollback journals and the install record.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Advisory lock against concurrent installer invocations.
    async fn acquire_lock(&self) -> Result<StoreLock, JournalError>;

    async fn append(&self, attempt_id: Uuid, entry: &JournalEntry) -> Result<(), JournalError>;
    async fn read_all(&self, attempt_id: Uuid) -> Result<Vec<JournalEntry>, JournalError>;
    async fn clear(&self, attempt_id: Uuid) -> Result<(), JournalError>;
    /// Attempts whose journals were never cleared (crash or pending rollback).
    async fn pending_attempts(&self) -> Result<Vec<Uuid>, JournalError>;

    async fn save_install_record(&self, record: &InstallRecord) -> Result<(), JournalError>;
    async fn load_install_record(&self) -> Result<Option<InstallRecord>, JournalError>;
    async fn clear_install_record(&self) -> Result<(), JournalError>;
}

/// Append handle owned by the action sequencer for the duration of one attempt.
///
/// Persists first, then mirrors in memory, so the in-memory journal never claims more than the
/// store holds.
pub struct JournalWriter<'a> {
    store: &'a dyn StateStore,
    journal: RollbackJournal,
}

impl<'a> JournalWriter<'a> {
    pub fn new(store: &'a dyn StateStore, attempt_id: Uuid) -> Self {
        Self {
            store,
            journal: RollbackJournal::new(attempt_id),
        }
    }

    pub async fn append(&mut self, entry: JournalEntry) -> Result<(), JournalError> {
        self.store.append(self.journal.attempt_id, &entry).await?;
        log::info!(
            "[PHASE: journal] [STEP: append] Recorded {:?} (attempt_id={}, entries={})",
            entry.step,
            self.journal.attempt_id,
            self.journal.entries.len() + 1
        );
        self.journal.entries.push(entry);
        Ok(())
    }

    pub fn journal(&self) -> &RollbackJournal {
        &self.journal
    }

    pub fn into_journal(self) -> RollbackJournal {
        self.journal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountInfo {
        AccountInfo {
            sid: Sid("S-1-5-21-9-9-9-1001".to_string()),
            username: "agentuser".to_string(),
            domain: "HOST".to_string(),
        }
    }

    #[tokio::test]
    async fn writer_persists_before_mirroring() {
        let store = MemoryStateStore::new();
        let id = Uuid::new_v4();
        let mut w = JournalWriter::new(&store, id);
        w.append(JournalEntry::user_created(&account())).await.unwrap();
        w.append(JournalEntry::services_installed(vec!["agent".into()]))
            .await
            .unwrap();

        let persisted = store.read_all(id).await.unwrap();
        let journal = w.into_journal();
        assert_eq!(persisted, journal.entries());
        assert_eq!(
            journal.steps(),
            vec![JournalStep::UserCreated, JournalStep::ServicesInstalled]
        );
    }

    #[tokio::test]
    async fn failed_persist_leaves_memory_untouched() {
        let store = MemoryStateStore::new();
        store.set_fail_appends(true);
        let mut w = JournalWriter::new(&store, Uuid::new_v4());
        assert!(w.append(JournalEntry::user_created(&account())).await.is_err());
        assert!(w.journal().is_empty());
    }

    #[test]
    fn entry_json_omits_empty_optionals() {
        let e = JournalEntry::services_installed(vec!["agent".into()]);
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"step\":\"services_installed\""));
        assert!(!json.contains("created_username"));
    }
}

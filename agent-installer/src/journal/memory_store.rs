// Process-local state store for tests and dry-runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{InstallRecord, JournalEntry, JournalError, StateStore, StoreLock};

#[derive(Default)]
pub struct MemoryStateStore {
    journals: Mutex<BTreeMap<Uuid, Vec<JournalEntry>>>,
    record: Mutex<Option<InstallRecord>>,
    locked: Arc<AtomicBool>,
    fail_appends: AtomicBool,
    append_calls: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `append` fail (journal outage simulation).
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Number of `append` calls so far, failed ones included. Survives `clear`.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn acquire_lock(&self) -> Result<StoreLock, JournalError> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(JournalError::Locked("in-memory store".to_string()));
        }
        Ok(StoreLock::flag(Arc::clone(&self.locked)))
    }

    async fn append(&self, attempt_id: Uuid, entry: &JournalEntry) -> Result<(), JournalError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(JournalError::io(
                "append",
                std::io::Error::new(std::io::ErrorKind::Other, "simulated journal outage"),
            ));
        }
        let mut journals = self.journals.lock().unwrap_or_else(|e| e.into_inner());
        journals.entry(attempt_id).or_default().push(entry.clone());
        Ok(())
    }

    async fn read_all(&self, attempt_id: Uuid) -> Result<Vec<JournalEntry>, JournalError> {
        let journals = self.journals.lock().unwrap_or_else(|e| e.into_inner());
        Ok(journals.get(&attempt_id).cloned().unwrap_or_default())
    }

    async fn clear(&self, attempt_id: Uuid) -> Result<(), JournalError> {
        let mut journals = self.journals.lock().unwrap_or_else(|e| e.into_inner());
        journals.remove(&attempt_id);
        Ok(())
    }

    async fn pending_attempts(&self) -> Result<Vec<Uuid>, JournalError> {
        let journals = self.journals.lock().unwrap_or_else(|e| e.into_inner());
        Ok(journals.keys().copied().collect())
    }

    async fn save_install_record(&self, record: &InstallRecord) -> Result<(), JournalError> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        Ok(())
    }

    async fn load_install_record(&self) -> Result<Option<InstallRecord>, JournalError> {
        Ok(self.record.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn clear_install_record(&self) -> Result<(), JournalError> {
        *self.record.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_is_exclusive_and_released_on_drop() {
        let store = MemoryStateStore::new();
        let guard = store.acquire_lock().await.unwrap();
        assert!(store.is_locked());
        assert!(matches!(
            store.acquire_lock().await,
            Err(JournalError::Locked(_))
        ));
        drop(guard);
        assert!(!store.is_locked());
        assert!(store.acquire_lock().await.is_ok());
    }

    #[tokio::test]
    async fn append_calls_are_counted_across_clear() {
        let store = MemoryStateStore::new();
        let id = Uuid::new_v4();
        let entry = JournalEntry::services_installed(vec!["agent".into()]);
        store.append(id, &entry).await.unwrap();
        store.clear(id).await.unwrap();
        store.set_fail_appends(true);
        assert!(store.append(id, &entry).await.is_err());
        assert_eq!(store.append_calls(), 2);
        assert!(store.read_all(id).await.unwrap().is_empty());
    }
}

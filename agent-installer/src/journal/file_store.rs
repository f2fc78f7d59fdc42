//! File-backed installer state.
//!
//! Layout under the state directory:
//! - `journal-<attempt_id>.jsonl` — one line per entry: `<sha256-hex> <json>`
//! - `install-record.json` — written atomically (tmp + rename)
//! - `installer.lock` — advisory lock, created with `create_new`
//!
//! Goals:
//! - Entries are fsynced before `append` returns
//! - Opening the journal retries transient lock errors (AV/indexers on Windows)
//! - A torn final line (crash mid-write) is dropped with a warning; any other bad line is fatal

use async_trait::async_trait;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

use super::{InstallRecord, JournalEntry, JournalError, StateStore, StoreLock};
use crate::security::crypto::sha256_hex;

const JOURNAL_PREFIX: &str = "journal-";
const JOURNAL_SUFFIX: &str = ".jsonl";
const RECORD_FILE: &str = "install-record.json";
const LOCK_FILE: &str = "installer.lock";

pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn journal_path(&self, attempt_id: Uuid) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", JOURNAL_PREFIX, attempt_id, JOURNAL_SUFFIX))
    }

    fn record_path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    async fn ensure_dir(&self) -> Result<(), JournalError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| JournalError::io(format!("create state dir {:?}", self.dir), e))
    }
}

fn is_transient_io_error(err: &std::io::Error) -> bool {
    if matches!(
        err.kind(),
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
    ) {
        return true;
    }
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("used by another process")
        || msg.contains("sharing violation")
        || msg.contains("access is denied")
        || msg.contains("resource busy")
}

fn encode_line(entry: &JournalEntry) -> Result<String, JournalError> {
    let json = serde_json::to_string(entry)?;
    Ok(format!("{} {}\n", sha256_hex(json.as_bytes()), json))
}

fn decode_lines(path: &Path, content: &str) -> Result<Vec<JournalEntry>, JournalError> {
    let complete = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();
    let mut entries = Vec::with_capacity(lines.len());

    for (idx, raw) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let is_last = line_no == lines.len();
        if raw.trim().is_empty() {
            continue;
        }

        let parsed = raw
            .split_once(' ')
            .ok_or_else(|| "missing checksum separator".to_string())
            .and_then(|(sum, json)| {
                if sha256_hex(json.as_bytes()) != sum {
                    return Err("checksum mismatch".to_string());
                }
                serde_json::from_str::<JournalEntry>(json).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(entry) => entries.push(entry),
            Err(reason) if is_last && !complete => {
                warn!(
                    "[PHASE: journal] [STEP: read] Dropping torn final line (path={:?}, line={}, reason={})",
                    path, line_no, reason
                );
            }
            Err(reason) => {
                return Err(JournalError::Corrupt {
                    path: path.to_path_buf(),
                    line: line_no,
                    reason,
                })
            }
        }
    }
    Ok(entries)
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn acquire_lock(&self) -> Result<StoreLock, JournalError> {
        self.ensure_dir().await?;
        let path = self.lock_path();
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create_new(true);
        let mut file = match opts.open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(JournalError::Locked(format!(
                    "{} exists; remove it if no installer is running",
                    path.display()
                )));
            }
            Err(e) => return Err(JournalError::io(format!("create lock {:?}", path), e)),
        };
        let stamp = format!("pid={} at={}\n", std::process::id(), chrono::Utc::now().to_rfc3339());
        file.write_all(stamp.as_bytes())
            .await
            .map_err(|e| JournalError::io("write lock", e))?;
        debug!("[PHASE: journal] [STEP: lock] Acquired {:?}", path);
        Ok(StoreLock::file(path))
    }

    async fn append(&self, attempt_id: Uuid, entry: &JournalEntry) -> Result<(), JournalError> {
        self.ensure_dir().await?;
        let path = self.journal_path(attempt_id);
        let line = encode_line(entry)?;

        let open_action = || async {
            let mut opts = tokio::fs::OpenOptions::new();
            opts.create(true).append(true);
            opts.open(&path).await
        };
        let retry_strategy = ExponentialBackoff::from_millis(50)
            .factor(2)
            .max_delay(std::time::Duration::from_millis(750))
            .take(3)
            .map(jitter);

        let mut file = RetryIf::spawn(retry_strategy, open_action, |e: &std::io::Error| {
            is_transient_io_error(e)
        })
        .await
        .map_err(|e| JournalError::io(format!("open journal {:?}", path), e))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| JournalError::io(format!("write journal {:?}", path), e))?;
        file.sync_data()
            .await
            .map_err(|e| JournalError::io(format!("fsync journal {:?}", path), e))?;
        Ok(())
    }

    async fn read_all(&self, attempt_id: Uuid) -> Result<Vec<JournalEntry>, JournalError> {
        let path = self.journal_path(attempt_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JournalError::io(format!("read journal {:?}", path), e)),
        };
        decode_lines(&path, &content)
    }

    async fn clear(&self, attempt_id: Uuid) -> Result<(), JournalError> {
        let path = self.journal_path(attempt_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(JournalError::io(format!("clear journal {:?}", path), e)),
        }
    }

    async fn pending_attempts(&self) -> Result<Vec<Uuid>, JournalError> {
        let mut rd = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JournalError::io("list state dir", e)),
        };
        let mut out = Vec::new();
        while let Some(ent) = rd
            .next_entry()
            .await
            .map_err(|e| JournalError::io("list state dir", e))?
        {
            let name = ent.file_name().to_string_lossy().to_string();
            let id = name
                .strip_prefix(JOURNAL_PREFIX)
                .and_then(|rest| rest.strip_suffix(JOURNAL_SUFFIX))
                .and_then(|id| Uuid::parse_str(id).ok());
            if let Some(id) = id {
                out.push(id);
            }
        }
        out.sort();
        Ok(out)
    }

    async fn save_install_record(&self, record: &InstallRecord) -> Result<(), JournalError> {
        self.ensure_dir().await?;
        let path = self.record_path();
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| JournalError::io(format!("write {:?}", tmp), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| JournalError::io(format!("rename {:?}", tmp), e))
    }

    async fn load_install_record(&self) -> Result<Option<InstallRecord>, JournalError> {
        let path = self.record_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JournalError::io(format!("read {:?}", path), e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn clear_install_record(&self) -> Result<(), JournalError> {
        let path = self.record_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(JournalError::io(format!("remove {:?}", path), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AccountInfo, Sid};
    use crate::journal::JournalStep;

    fn account() -> AccountInfo {
        AccountInfo {
            sid: Sid("S-1-5-21-1-2-3-1001".to_string()),
            username: "agentuser".to_string(),
            domain: "HOST".to_string(),
        }
    }

    #[tokio::test]
    async fn append_then_read_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));
        let id = Uuid::new_v4();

        store
            .append(id, &JournalEntry::user_created(&account()))
            .await
            .unwrap();
        store
            .append(id, &JournalEntry::services_installed(vec!["agent".into()]))
            .await
            .unwrap();

        let entries = store.read_all(id).await.unwrap();
        let steps: Vec<JournalStep> = entries.iter().map(|e| e.step).collect();
        assert_eq!(
            steps,
            vec![JournalStep::UserCreated, JournalStep::ServicesInstalled]
        );
        assert_eq!(entries[0].created_sid, Some(account().sid));
        assert_eq!(store.pending_attempts().await.unwrap(), vec![id]);

        store.clear(id).await.unwrap();
        assert!(store.read_all(id).await.unwrap().is_empty());
        assert!(store.pending_attempts().await.unwrap().is_empty());
        // clearing twice is fine
        store.clear(id).await.unwrap();
    }

    #[tokio::test]
    async fn tampered_line_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let id = Uuid::new_v4();
        store
            .append(id, &JournalEntry::user_created(&account()))
            .await
            .unwrap();
        store
            .append(id, &JournalEntry::services_installed(vec!["agent".into()]))
            .await
            .unwrap();

        let path = store.journal_path(id);
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replacen("agentuser", "otheruser", 1)).unwrap();

        match store.read_all(id).await {
            Err(JournalError::Corrupt { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn torn_final_line_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let id = Uuid::new_v4();
        store
            .append(id, &JournalEntry::user_created(&account()))
            .await
            .unwrap();

        let path = store.journal_path(id);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("deadbeef {\"step\":\"services_ins");
        std::fs::write(&path, content).unwrap();

        let entries = store.read_all(id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].step, JournalStep::UserCreated);
    }

    #[tokio::test]
    async fn lock_file_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let guard = store.acquire_lock().await.unwrap();
        assert!(matches!(
            store.acquire_lock().await,
            Err(JournalError::Locked(_))
        ));
        drop(guard);
        assert!(!store.lock_path().exists());
        let _again = store.acquire_lock().await.unwrap();
    }

    #[tokio::test]
    async fn install_record_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(store.load_install_record().await.unwrap().is_none());

        let record = InstallRecord {
            attempt_id: Uuid::new_v4(),
            username: "agentuser".into(),
            domain: "HOST".into(),
            sid: account().sid,
            created_user: true,
            installed_at: chrono::Utc::now(),
        };
        store.save_install_record(&record).await.unwrap();
        assert_eq!(store.load_install_record().await.unwrap(), Some(record));

        store.clear_install_record().await.unwrap();
        assert!(store.load_install_record().await.unwrap().is_none());
    }
}

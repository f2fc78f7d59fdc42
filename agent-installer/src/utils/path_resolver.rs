use anyhow::Result;
use std::path::PathBuf;

const LOG_FOLDER_NAME: &str = "installer-logs";
const STATE_FOLDER_NAME: &str = "installer-state";

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> Result<PathBuf> {
    // Prefer the folder where the EXE is running from (works in dev and deployed)
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            return Ok(dir.to_path_buf());
        }
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    Ok(cwd)
}

/// Base folder for installer-owned data: the machine-wide data dir when available
/// (`%PROGRAMDATA%`-like on Windows, `~/.local/share` elsewhere), else the deployment folder.
fn resolve_data_root() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_local_dir() {
        return Ok(dir.join("agent-installer"));
    }
    resolve_deployment_folder()
}

/// Resolve log folder (absolute path), creating it if needed.
pub fn resolve_log_folder() -> Result<PathBuf> {
    let log_dir = resolve_data_root()?.join(LOG_FOLDER_NAME);
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", log_dir, e))?;
    Ok(log_dir)
}

/// Default directory for the rollback journal and install record.
///
/// Not created here; the journal store creates it on first write.
pub fn default_state_folder() -> PathBuf {
    resolve_data_root()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(STATE_FOLDER_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_folder_is_named_consistently() {
        let p = default_state_folder();
        assert!(p.ends_with(STATE_FOLDER_NAME));
    }
}

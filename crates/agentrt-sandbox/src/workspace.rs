//! Workspace lifecycle: workspaces persist independent of containers.
//! A retention policy sweeps directories untouched beyond a configured
//! duration. Not part of the hot path — run periodically out-of-band.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkspacePolicy {
    pub retention: Duration,
}

impl Default for WorkspacePolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Walk immediate children of `root` (one level: `<root>/<user_id>/<chat_id>`)
/// and remove any chat workspace whose last-modified time is older than the
/// policy's retention. Returns the removed paths.
pub async fn sweep_stale_workspaces(root: &Path, policy: &WorkspacePolicy, now: DateTime<Utc>) -> std::io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let mut user_dirs = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(e),
    };

    while let Some(user_entry) = user_dirs.next_entry().await? {
        if !user_entry.file_type().await?.is_dir() {
            continue;
        }
        let mut chat_dirs = tokio::fs::read_dir(user_entry.path()).await?;
        while let Some(chat_entry) = chat_dirs.next_entry().await? {
            if !chat_entry.file_type().await?.is_dir() {
                continue;
            }
            let metadata = chat_entry.metadata().await?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            let age = now.signed_duration_since(modified);
            if age.to_std().unwrap_or_default() > policy.retention {
                let path = chat_entry.path();
                tokio::fs::remove_dir_all(&path).await?;
                removed.push(path);
            }
        }
    }
    Ok(removed)
}

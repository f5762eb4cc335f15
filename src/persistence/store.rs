use super::snapshot::{SessionSnapshot, SnapshotInfo};
use crate::session::Session;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

const SNAPSHOT_EXTENSION: &str = "json";

/// Whether `id` can name a snapshot file
///
/// Only ASCII letters, digits, `_` and `-` are allowed so a snapshot path can
/// never leave the storage directory.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Disk usage of the snapshot directory
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub storage_directory: String,
    pub total_sessions: usize,
    pub total_size_bytes: u64,
    pub expired_sessions: usize,
    pub max_age_secs: u64,
    pub stats_time: DateTime<Utc>,
}

/// File-backed store of session snapshots
///
/// One JSON file per session id. Writes go to a temporary file first and are
/// renamed into place, so a crash never leaves a half-written snapshot.
#[derive(Debug, Clone)]
pub struct PersistenceStore {
    dir: PathBuf,
    max_age: Duration,
}

impl PersistenceStore {
    /// Open (creating if needed) the snapshot directory
    pub async fn open(dir: impl Into<PathBuf>, max_age: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create persistence directory: {:?}", dir))?;

        info!(
            "Persistence store ready: {:?} (max age {}h)",
            dir,
            max_age.as_secs() / 3600
        );

        Ok(Self { dir, max_age })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn snapshot_path(&self, session_id: &str) -> Result<PathBuf> {
        if !is_valid_session_id(session_id) {
            bail!("Invalid session id for persistence: {:?}", session_id);
        }
        Ok(self
            .dir
            .join(format!("{}.{}", session_id, SNAPSHOT_EXTENSION)))
    }

    /// Write a full snapshot, replacing any previous one
    pub async fn save(&self, session: &Session) -> Result<()> {
        let path = self.snapshot_path(&session.id)?;
        let tmp_path = path.with_extension("json.tmp");

        let snapshot = SessionSnapshot::capture(session);
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .with_context(|| format!("Failed to serialize session {}", session.id))?;

        fs::write(&tmp_path, &bytes)
            .await
            .with_context(|| format!("Failed to write snapshot: {:?}", tmp_path))?;
        fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to move snapshot into place: {:?}", path))?;

        info!(
            "Session saved: {} ({} messages, {} bytes)",
            session.id,
            session.messages.len(),
            bytes.len()
        );
        Ok(())
    }

    async fn read_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        let path = self.snapshot_path(session_id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No snapshot for session {}", session_id);
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read snapshot: {:?}", path))
            }
        };

        let snapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt snapshot: {:?}", path))?;
        Ok(Some(snapshot))
    }

    /// Rebuild a session from its snapshot; `None` if there is none
    pub async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        let session = self
            .read_snapshot(session_id)
            .await?
            .map(SessionSnapshot::into_session);

        if let Some(session) = &session {
            info!(
                "Session loaded: {} (status={}, {} messages)",
                session.id,
                session.status,
                session.messages.len()
            );
        }
        Ok(session)
    }

    pub async fn snapshot_info(&self, session_id: &str) -> Result<Option<SnapshotInfo>> {
        Ok(self
            .read_snapshot(session_id)
            .await?
            .as_ref()
            .map(SnapshotInfo::from))
    }

    /// Remove a snapshot, returning whether one existed
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let path = self.snapshot_path(session_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Snapshot deleted: {}", session_id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete snapshot: {:?}", path)),
        }
    }

    /// Snapshot files with their size and modification time
    async fn snapshot_files(&self) -> Result<Vec<(String, u64, SystemTime)>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list persistence directory: {:?}", self.dir))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_session_id(stem) {
                continue;
            }

            match entry.metadata().await {
                Ok(meta) => {
                    let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
                    files.push((stem.to_string(), meta.len(), modified));
                }
                Err(e) => warn!("Skipping unreadable snapshot {:?}: {}", path, e),
            }
        }
        Ok(files)
    }

    /// Ids of every persisted session, sorted
    pub async fn list_persisted(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .snapshot_files()
            .await?
            .into_iter()
            .map(|(id, _, _)| id)
            .collect();
        ids.sort();
        debug!("Found {} persisted sessions", ids.len());
        Ok(ids)
    }

    fn cutoff(max_age: Duration) -> SystemTime {
        SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Delete snapshots last written more than the configured max age ago
    pub async fn cleanup_expired(&self) -> Result<usize> {
        self.cleanup_older_than(self.max_age).await
    }

    pub async fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Self::cutoff(max_age);
        let mut removed = 0;

        for (id, _, modified) in self.snapshot_files().await? {
            if modified >= cutoff {
                continue;
            }
            match self.delete(&id).await {
                Ok(true) => {
                    removed += 1;
                    debug!("Expired snapshot removed: {}", id);
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to remove expired snapshot {}: {:#}", id, e),
            }
        }

        if removed > 0 {
            info!("Cleaned up {} expired snapshots", removed);
        }
        Ok(removed)
    }

    pub async fn storage_stats(&self) -> Result<StorageStats> {
        let files = self.snapshot_files().await?;
        let cutoff = Self::cutoff(self.max_age);

        Ok(StorageStats {
            storage_directory: self.dir.display().to_string(),
            total_sessions: files.len(),
            total_size_bytes: files.iter().map(|(_, size, _)| size).sum(),
            expired_sessions: files.iter().filter(|(_, _, m)| *m < cutoff).count(),
            max_age_secs: self.max_age.as_secs(),
            stats_time: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_charset() {
        assert!(is_valid_session_id("3f1c2a9e-0b7d-4c55-9a7e-2d2f5b8f9e10"));
        assert!(is_valid_session_id("demo_session"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../etc/passwd"));
        assert!(!is_valid_session_id("a b"));
    }
}

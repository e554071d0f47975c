//! Backups written next to a file before it is overwritten.
//!
//! Two naming schemes live side by side in the sibling `backups/` directory:
//!
//! - `<basename>.bak`: a single generation per file, replaced on every backup.
//!   Copy targets and JSON documents get one of these before each overwrite.
//! - `<basename>.<epoch_ms>.bak`: timestamped snapshots of JSON documents,
//!   pruned by count with [`BackupManager::cleanup_old_backups`].

use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

pub const BACKUP_DIR_NAME: &str = "backups";
pub const BACKUP_EXTENSION: &str = "bak";
pub const DEFAULT_MAX_BACKUPS: usize = 10;

/// A timestamped backup found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBackup {
    pub path: PathBuf,
    pub timestamp_ms: i64,
}

impl SnapshotBackup {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackupManager;

impl BackupManager {
    pub fn new() -> Self {
        Self
    }

    pub fn backup_dir_for(file_path: &Path) -> PathBuf {
        file_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(BACKUP_DIR_NAME)
    }

    fn base_name(file_path: &Path) -> Option<String> {
        file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
    }

    /// Path of the single-generation backup for `file_path`.
    pub fn backup_path_for(file_path: &Path) -> Option<PathBuf> {
        let name = Self::base_name(file_path)?;
        Some(Self::backup_dir_for(file_path).join(format!("{name}.{BACKUP_EXTENSION}")))
    }

    /// Copies `file_path` to `backups/<basename>.bak`, replacing any previous
    /// backup. Failures are logged and reported as `None`; the caller's write
    /// goes ahead regardless.
    pub async fn create_backup(&self, file_path: &Path) -> Option<PathBuf> {
        match self.try_create_backup(file_path).await {
            Ok(path) => {
                log::debug!("Backed up {} to {}", file_path.display(), path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("Failed to back up {}: {}", file_path.display(), e);
                None
            }
        }
    }

    async fn try_create_backup(&self, file_path: &Path) -> std::io::Result<PathBuf> {
        let backup_path = Self::backup_path_for(file_path).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
        })?;
        if let Some(dir) = backup_path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::copy(file_path, &backup_path).await?;
        Ok(backup_path)
    }

    /// Writes a timestamped snapshot `backups/<basename>.<epoch_ms>.bak`.
    pub async fn create_snapshot(&self, file_path: &Path) -> Option<PathBuf> {
        let name = Self::base_name(file_path)?;
        let dir = Self::backup_dir_for(file_path);
        let mut ts = Utc::now().timestamp_millis();

        let result: std::io::Result<PathBuf> = async {
            fs::create_dir_all(&dir).await?;
            // Two snapshots in the same millisecond must not collide.
            let mut candidate = dir.join(format!("{name}.{ts}.{BACKUP_EXTENSION}"));
            while fs::try_exists(&candidate).await.unwrap_or(false) {
                ts += 1;
                candidate = dir.join(format!("{name}.{ts}.{BACKUP_EXTENSION}"));
            }
            fs::copy(file_path, &candidate).await?;
            Ok(candidate)
        }
        .await;

        match result {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Failed to snapshot {}: {}", file_path.display(), e);
                None
            }
        }
    }

    /// Keeps an unparseable document as `backups/<basename>.<epoch_ms>.corrupt`
    /// so it is never picked up as a restore candidate.
    pub async fn preserve_corrupt(&self, file_path: &Path) -> Option<PathBuf> {
        let name = Self::base_name(file_path)?;
        let dir = Self::backup_dir_for(file_path);
        let ts = Utc::now().timestamp_millis();
        let target = dir.join(format!("{name}.{ts}.corrupt"));

        let result: std::io::Result<u64> = async {
            fs::create_dir_all(&dir).await?;
            fs::copy(file_path, &target).await
        }
        .await;

        match result {
            Ok(_) => {
                log::warn!("Kept corrupted {} as {}", file_path.display(), target.display());
                Some(target)
            }
            Err(e) => {
                log::warn!("Failed to keep corrupted {}: {}", file_path.display(), e);
                None
            }
        }
    }

    /// Timestamped backups of `file_path`, oldest first.
    pub async fn list_snapshots(&self, file_path: &Path) -> Vec<SnapshotBackup> {
        let Some(name) = Self::base_name(file_path) else {
            return Vec::new();
        };
        let dir = Self::backup_dir_for(file_path);
        let prefix = format!("{name}.");
        let suffix = format!(".{BACKUP_EXTENSION}");

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut snapshots = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let entry_name = entry.file_name().to_string_lossy().to_string();
            let Some(middle) = entry_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
            else {
                continue;
            };
            if middle.is_empty() || !middle.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            if let Ok(timestamp_ms) = middle.parse::<i64>() {
                snapshots.push(SnapshotBackup {
                    path: entry.path(),
                    timestamp_ms,
                });
            }
        }

        snapshots.sort_by_key(|s| s.timestamp_ms);
        snapshots
    }

    /// Deletes the oldest timestamped backups beyond `max_backups` (floor 1).
    /// Returns how many were removed; per-file failures are logged and skipped.
    pub async fn cleanup_old_backups(&self, file_path: &Path, max_backups: usize) -> usize {
        let max_backups = max_backups.max(1);
        let snapshots = self.list_snapshots(file_path).await;
        if snapshots.len() <= max_backups {
            return 0;
        }

        let excess = snapshots.len() - max_backups;
        let mut removed = 0;
        for snapshot in snapshots.into_iter().take(excess) {
            match fs::remove_file(&snapshot.path).await {
                Ok(()) => removed += 1,
                Err(e) => log::warn!(
                    "Failed to remove old backup {}: {}",
                    snapshot.path.display(),
                    e
                ),
            }
        }
        removed
    }

    /// Removes `.bak` files in `backup_dir` whose modification time is older
    /// than `days`. Returns the number of removed files.
    pub async fn delete_backups_older_than(&self, backup_dir: &Path, days: u32) -> usize {
        let max_age = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
        let now = SystemTime::now();

        let mut entries = match fs::read_dir(backup_dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_backup = path
                .extension()
                .map(|ext| ext == BACKUP_EXTENSION)
                .unwrap_or(false);
            if !is_backup {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to remove expired backup {}: {}", path.display(), e),
            }
        }
        removed
    }

    /// Copies `backup` over `file_path`.
    pub async fn restore(&self, backup: &Path, file_path: &Path) -> std::io::Result<()> {
        fs::copy(backup, file_path).await?;
        Ok(())
    }
}

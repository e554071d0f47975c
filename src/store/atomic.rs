//! Crash-safe JSON documents.
//!
//! Every document lives as `<dir>/<name>.json`. Writes go through a verified
//! temp file and replace the target only after the payload has been parsed
//! back. Reads never fail: blank files are restored from the newest valid
//! backup, damaged files are repaired when possible and otherwise reset to
//! the caller's default. Both cases are announced as [`StoreNotice`]s.

use crate::backup::BackupManager;
use crate::error::{StoreError, StoreResult};
use crate::store::lock_registry::LockRegistry;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

const NOTICE_CAPACITY: usize = 64;
const MAX_TRIM_ATTEMPTS: usize = 32;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Timestamped snapshots kept per document.
    pub snapshot_retention: usize,
    pub dir_retries: u32,
    pub dir_retry_delay: Duration,
    pub write_retries: u32,
    pub write_retry_delay: Duration,
    /// Replace with `rename` first and fall back to overwriting in place.
    pub prefer_rename: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            snapshot_retention: crate::backup::DEFAULT_MAX_BACKUPS,
            dir_retries: 3,
            dir_retry_delay: Duration::from_millis(100),
            write_retries: 3,
            write_retry_delay: Duration::from_millis(200),
            prefer_rename: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMetadata {
    pub initialized: bool,
    pub restored: bool,
    pub recovered: bool,
    pub recovery_failed: bool,
    pub backup_file: Option<String>,
    pub backup_date: Option<DateTime<Utc>>,
}

impl ReadMetadata {
    /// True when the UI should tell the user something happened to the file.
    pub fn is_notable(&self) -> bool {
        self.initialized || self.restored || self.recovered || self.recovery_failed
    }
}

#[derive(Debug, Clone)]
pub struct ReadOutcome<T> {
    pub data: T,
    pub metadata: ReadMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreNotice {
    Initialized {
        document: String,
    },
    Restored {
        document: String,
        backup_file: String,
        backup_date: Option<DateTime<Utc>>,
    },
    Recovered {
        document: String,
    },
    RecoveryFailed {
        document: String,
        error: String,
    },
}

impl StoreNotice {
    pub fn document(&self) -> &str {
        match self {
            StoreNotice::Initialized { document }
            | StoreNotice::Restored { document, .. }
            | StoreNotice::Recovered { document }
            | StoreNotice::RecoveryFailed { document, .. } => document,
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, StoreNotice::RecoveryFailed { .. })
    }

    pub fn message(&self) -> String {
        match self {
            StoreNotice::Initialized { document } => {
                format!("{} was initialized with default values", document)
            }
            StoreNotice::Restored {
                document,
                backup_file,
                backup_date,
            } => match backup_date {
                Some(date) => format!(
                    "{} was restored from {} ({})",
                    document,
                    backup_file,
                    date.format("%Y-%m-%d %H:%M:%S")
                ),
                None => format!("{} was restored from {}", document, backup_file),
            },
            StoreNotice::Recovered { document } => {
                format!("{} was damaged and has been repaired", document)
            }
            StoreNotice::RecoveryFailed { document, error } => {
                format!("{} could not be recovered: {}", document, error)
            }
        }
    }
}

#[derive(Debug)]
struct StoreInner {
    dir: PathBuf,
    locks: LockRegistry,
    backups: BackupManager,
    options: StoreOptions,
    snapshot_retention: AtomicUsize,
    notices: broadcast::Sender<StoreNotice>,
}

/// Handle to the JSON documents in one data directory. Clones share locks.
#[derive(Debug, Clone)]
pub struct JsonStore {
    inner: Arc<StoreInner>,
}

fn file_name(name: &str) -> String {
    if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{name}.json")
    }
}

fn lock_key(name: &str) -> String {
    file_name(name).to_lowercase()
}

fn temp_path_for(path: &Path) -> PathBuf {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "store".to_string());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = format!(".{}.{}.{}.{}.tmp", base, std::process::id(), nanos, seq);
    path.with_file_name(name)
}

/// Drops trailing bytes after a closing bracket until the rest parses.
fn recover_truncated<T: DeserializeOwned>(content: &str) -> Option<T> {
    let mut end = content.len();
    for _ in 0..MAX_TRIM_ATTEMPTS {
        let pos = content[..end].rfind(|c: char| c == ']' || c == '}')?;
        if let Ok(data) = serde_json::from_str(&content[..=pos]) {
            return Some(data);
        }
        end = pos;
    }
    None
}

fn is_valid_json(content: &str) -> bool {
    !content.trim().is_empty() && serde_json::from_str::<serde_json::Value>(content).is_ok()
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_options(dir, StoreOptions::default())
    }

    pub fn with_options(dir: impl Into<PathBuf>, options: StoreOptions) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                dir: dir.into(),
                locks: LockRegistry::new(),
                backups: BackupManager::new(),
                snapshot_retention: AtomicUsize::new(options.snapshot_retention),
                options,
                notices,
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.inner.dir.join(file_name(name))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.inner.dir.join(crate::backup::BACKUP_DIR_NAME)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreNotice> {
        self.inner.notices.subscribe()
    }

    pub fn snapshot_retention(&self) -> usize {
        self.inner.snapshot_retention.load(Ordering::Relaxed)
    }

    pub fn set_snapshot_retention(&self, count: usize) {
        self.inner
            .snapshot_retention
            .store(count.max(1), Ordering::Relaxed);
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.inner.locks
    }

    fn notify(&self, notice: StoreNotice) {
        log::info!("{}", notice.message());
        // No subscribers is fine.
        let _ = self.inner.notices.send(notice);
    }

    /// Reads `name`, falling back to `default` when the document is missing
    /// or beyond repair. Never fails.
    pub async fn read<T>(&self, name: &str, default: T) -> ReadOutcome<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let _guard = self.inner.locks.acquire(&lock_key(name)).await;
        self.read_unlocked(name, default).await
    }

    async fn read_unlocked<T>(&self, name: &str, default: T) -> ReadOutcome<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let path = self.path_for(name);
        let document = file_name(name);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return self.initialize(&path, document, default, false).await;
            }
            Err(e) => {
                log::error!("Failed to read {}: {}", path.display(), e);
                self.notify(StoreNotice::RecoveryFailed {
                    document,
                    error: e.to_string(),
                });
                return ReadOutcome {
                    data: default,
                    metadata: ReadMetadata {
                        recovery_failed: true,
                        ..Default::default()
                    },
                };
            }
        };

        if content.trim().is_empty() {
            log::warn!("{} is empty, looking for a backup", path.display());
            if let Some(outcome) = self.restore_latest(&path, &document).await {
                return outcome;
            }
            return self.initialize(&path, document, default, false).await;
        }

        let parse_error = match serde_json::from_str::<T>(&content) {
            Ok(data) => {
                return ReadOutcome {
                    data,
                    metadata: ReadMetadata::default(),
                }
            }
            Err(e) => e,
        };

        log::warn!("{} is damaged: {}", path.display(), parse_error);
        self.inner.backups.preserve_corrupt(&path).await;

        if let Some(data) = recover_truncated::<T>(&content) {
            if let Err(e) = self.write_unlocked(&path, &data, false).await {
                log::error!("Failed to persist repaired {}: {}", path.display(), e);
            }
            self.notify(StoreNotice::Recovered { document });
            return ReadOutcome {
                data,
                metadata: ReadMetadata {
                    recovered: true,
                    ..Default::default()
                },
            };
        }

        self.notify(StoreNotice::RecoveryFailed {
            document: document.clone(),
            error: parse_error.to_string(),
        });
        self.initialize(&path, document, default, true).await
    }

    async fn initialize<T>(
        &self,
        path: &Path,
        document: String,
        default: T,
        recovery_failed: bool,
    ) -> ReadOutcome<T>
    where
        T: Serialize + Sync,
    {
        if let Err(e) = self.write_unlocked(path, &default, false).await {
            log::error!("Failed to initialize {}: {}", path.display(), e);
        }
        self.notify(StoreNotice::Initialized { document });
        ReadOutcome {
            data: default,
            metadata: ReadMetadata {
                initialized: true,
                recovery_failed,
                ..Default::default()
            },
        }
    }

    /// Newest timestamped snapshot first, then the single-generation backup.
    async fn restore_latest<T>(&self, path: &Path, document: &str) -> Option<ReadOutcome<T>>
    where
        T: DeserializeOwned,
    {
        let mut candidates: Vec<(PathBuf, Option<DateTime<Utc>>)> = self
            .inner
            .backups
            .list_snapshots(path)
            .await
            .into_iter()
            .rev()
            .map(|s| {
                let date = s.created_at();
                (s.path, date)
            })
            .collect();
        if let Some(single) = BackupManager::backup_path_for(path) {
            let date = fs::metadata(&single)
                .await
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            candidates.push((single, date));
        }

        for (candidate, date) in candidates {
            let Ok(content) = fs::read_to_string(&candidate).await else {
                continue;
            };
            if content.trim().is_empty() {
                continue;
            }
            let Ok(data) = serde_json::from_str::<T>(&content) else {
                log::debug!("Skipping unusable backup {}", candidate.display());
                continue;
            };

            if let Err(e) = self.inner.backups.restore(&candidate, path).await {
                log::warn!(
                    "Restored data from {} but could not rewrite {}: {}",
                    candidate.display(),
                    path.display(),
                    e
                );
            }
            let backup_file = candidate
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            self.notify(StoreNotice::Restored {
                document: document.to_string(),
                backup_file: backup_file.clone(),
                backup_date: date,
            });
            return Some(ReadOutcome {
                data,
                metadata: ReadMetadata {
                    restored: true,
                    backup_file: Some(backup_file),
                    backup_date: date,
                    ..Default::default()
                },
            });
        }
        None
    }

    pub async fn write<T>(&self, name: &str, data: &T) -> StoreResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let _guard = self.inner.locks.acquire(&lock_key(name)).await;
        let path = self.path_for(name);
        self.write_unlocked(&path, data, true).await
    }

    /// Read-modify-write under one lock hold. If `mutate` fails nothing is
    /// written.
    pub async fn update<T, R, F>(&self, name: &str, default: T, mutate: F) -> StoreResult<R>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync,
        F: FnOnce(&mut T) -> StoreResult<R> + Send,
    {
        let _guard = self.inner.locks.acquire(&lock_key(name)).await;
        let path = self.path_for(name);

        let mut data = self.read_unlocked(name, default.clone()).await.data;
        let result = mutate(&mut data)?;

        if let Err(e) = self.write_unlocked(&path, &data, true).await {
            log::error!("Failed to update {}: {}", path.display(), e);
            self.reinitialize_if_unusable(&path, &default).await;
            return Err(e);
        }
        Ok(result)
    }

    async fn reinitialize_if_unusable<T>(&self, path: &Path, default: &T)
    where
        T: Serialize + Sync,
    {
        let usable = fs::read_to_string(path)
            .await
            .map(|content| is_valid_json(&content))
            .unwrap_or(false);
        if usable {
            return;
        }
        log::warn!("{} is unusable after a failed write, resetting", path.display());
        if let Err(e) = self.write_unlocked(path, default, false).await {
            log::error!("Failed to reset {}: {}", path.display(), e);
        }
    }

    async fn write_unlocked<T>(&self, path: &Path, data: &T, with_backup: bool) -> StoreResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let json = serde_json::to_string_pretty(data)?;
        serde_json::from_str::<serde_json::Value>(&json)?;

        if let Some(dir) = path.parent() {
            self.ensure_dir(dir).await?;
        }

        match create_new(path, &json).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(StoreError::io(path, e)),
        }

        let backup = if with_backup {
            self.backup(path).await
        } else {
            None
        };

        let temp = temp_path_for(path);
        if let Err(e) = self.write_temp(&temp, &json).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        self.commit(&temp, path, backup.as_deref()).await
    }

    /// Moves a verified temp file over `path`, then checks the result. The
    /// backup is restored when either step fails.
    async fn commit(&self, temp: &Path, path: &Path, backup: Option<&Path>) -> StoreResult<()> {
        if let Err(e) = self.replace(temp, path).await {
            log::error!("Failed to replace {}: {}", path.display(), e);
            let _ = fs::remove_file(temp).await;
            self.restore_backup(backup, path).await;
            return Err(StoreError::io(path, e));
        }

        let verified = fs::read_to_string(path)
            .await
            .map(|content| is_valid_json(&content))
            .unwrap_or(false);
        let _ = fs::remove_file(temp).await;

        if !verified {
            log::error!("Final verification of {} failed", path.display());
            if self.restore_backup(backup, path).await {
                return Err(StoreError::VerificationFailed(path.to_path_buf()));
            }
            log::warn!("Keeping unverified {}", path.display());
        }
        Ok(())
    }

    async fn backup(&self, path: &Path) -> Option<PathBuf> {
        let backups = &self.inner.backups;
        let single = backups.create_backup(path).await;
        if backups.create_snapshot(path).await.is_some() {
            backups
                .cleanup_old_backups(path, self.snapshot_retention())
                .await;
        }
        single
    }

    async fn restore_backup(&self, backup: Option<&Path>, path: &Path) -> bool {
        let Some(backup) = backup else {
            return false;
        };
        match self.inner.backups.restore(backup, path).await {
            Ok(()) => {
                log::warn!("Restored {} from {}", path.display(), backup.display());
                true
            }
            Err(e) => {
                log::error!("Failed to restore {}: {}", path.display(), e);
                false
            }
        }
    }

    async fn ensure_dir(&self, dir: &Path) -> StoreResult<()> {
        let attempts = self.inner.options.dir_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match fs::create_dir_all(dir).await {
                Ok(()) => {
                    let readonly = fs::metadata(dir)
                        .await
                        .map(|m| m.permissions().readonly())
                        .unwrap_or(false);
                    if readonly {
                        return Err(StoreError::io(
                            dir,
                            io::Error::new(io::ErrorKind::PermissionDenied, "directory is read-only"),
                        ));
                    }
                    return Ok(());
                }
                Err(e) => {
                    log::debug!(
                        "mkdir {} failed (attempt {}/{}): {}",
                        dir.display(),
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.inner.options.dir_retry_delay * attempt).await;
            }
        }
        Err(StoreError::io(
            dir,
            last_error.unwrap_or_else(|| io::Error::other("mkdir failed")),
        ))
    }

    async fn write_temp(&self, temp: &Path, json: &str) -> StoreResult<()> {
        let attempts = self.inner.options.write_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match write_and_verify(temp, json).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!(
                        "Temp write {} failed (attempt {}/{}): {}",
                        temp.display(),
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.inner.options.write_retry_delay * attempt).await;
            }
        }
        Err(StoreError::io(
            temp,
            last_error.unwrap_or_else(|| io::Error::other("temp write failed")),
        ))
    }

    async fn replace(&self, temp: &Path, path: &Path) -> io::Result<()> {
        if self.inner.options.prefer_rename {
            match fs::rename(temp, path).await {
                Ok(()) => return Ok(()),
                Err(e) => log::debug!(
                    "rename onto {} failed, overwriting in place: {}",
                    path.display(),
                    e
                ),
            }
        }
        let verified = fs::read_to_string(temp).await?;
        fs::write(path, verified).await
    }
}

async fn create_new(path: &Path, json: &str) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let written = async {
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    if let Err(e) = written {
        drop(file);
        let _ = fs::remove_file(path).await;
        return Err(e);
    }
    Ok(())
}

async fn write_and_verify(temp: &Path, json: &str) -> io::Result<()> {
    {
        let mut file = fs::File::create(temp).await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
    }
    let written = fs::read_to_string(temp).await?;
    serde_json::from_str::<serde_json::Value>(&written)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if written != json {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "temp file content does not match payload",
        ));
    }
    Ok(())
}

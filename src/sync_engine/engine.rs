use crate::backup::BackupManager;
use crate::error_codes;
use crate::path_validation::is_network_path;
use crate::patterns::FilePatterns;
use crate::sync_engine::lock_probe::{FileLockProbe, LockProbe};
use crate::sync_engine::retry::{with_retry, RetryPolicy};
use crate::sync_engine::types::{CopiedFile, CopyOptions, CopyOutcome, FileFailure, RetryOutcome};
use std::hash::Hasher;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

fn failure_from_io(file_name: Option<&str>, context: String, err: &io::Error, fallback: &str) -> FileFailure {
    let code = error_codes::io_error_code(err).unwrap_or(fallback);
    FileFailure::new(file_name, format!("{context}: {err}"), Some(code))
}

pub struct CopyEngine<L = FileLockProbe> {
    lock_probe: L,
    backups: BackupManager,
}

impl Default for CopyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyEngine {
    pub fn new() -> Self {
        Self::with_lock_probe(FileLockProbe)
    }
}

impl<L: LockProbe> CopyEngine<L> {
    pub fn with_lock_probe(lock_probe: L) -> Self {
        Self {
            lock_probe,
            backups: BackupManager::new(),
        }
    }

    async fn calculate_checksum(&self, path: &Path) -> io::Result<u64> {
        use twox_hash::XxHash64;

        let mut file = fs::File::open(path).await?;
        let mut hasher = XxHash64::with_seed(0);
        let mut buffer = [0u8; 8192];

        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.write(&buffer[..n]);
        }

        Ok(hasher.finish())
    }

    async fn differs(&self, source: &Path, target: &Path, source_size: u64) -> bool {
        let target_meta = match fs::metadata(target).await {
            Ok(meta) => meta,
            Err(_) => return true,
        };
        if target_meta.len() != source_size {
            return true;
        }

        match (
            self.calculate_checksum(source).await,
            self.calculate_checksum(target).await,
        ) {
            (Ok(a), Ok(b)) => a != b,
            _ => true,
        }
    }

    /// Names of regular files directly inside `source` that match `patterns`,
    /// sorted so runs are reproducible.
    pub async fn list_candidates(&self, source: &Path, patterns: &FilePatterns) -> io::Result<Vec<String>> {
        let source = source.to_path_buf();
        let patterns = patterns.clone();

        let listed = tokio::task::spawn_blocking(move || -> io::Result<Vec<String>> {
            let meta = std::fs::metadata(&source)?;
            if !meta.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{} is not a directory", source.display()),
                ));
            }

            let mut names = Vec::new();
            for entry in WalkDir::new(&source).min_depth(1).max_depth(1) {
                let entry = entry.map_err(io::Error::from)?;
                if !entry.path().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if patterns.matches(&name) {
                    names.push(name);
                }
            }
            names.sort();
            Ok(names)
        })
        .await;

        listed.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    /// Copies every file in `source` matching `patterns` into `target`.
    ///
    /// Per-file problems (unreadable source, target in use, I/O errors) are
    /// recorded in the outcome and do not stop the remaining files. Existing
    /// targets are overwritten without a backup; see [`Self::backup_existing`].
    pub async fn copy(
        &self,
        source: &Path,
        target: &Path,
        patterns: &FilePatterns,
        options: &CopyOptions,
    ) -> CopyOutcome {
        if !fs::try_exists(target).await.unwrap_or(false) {
            if !options.create_dir_if_missing {
                log::info!("Target directory {} does not exist", target.display());
                return CopyOutcome::directory_not_exists();
            }
            if let Err(e) = fs::create_dir_all(target).await {
                return CopyOutcome::from_parts(
                    Vec::new(),
                    vec![failure_from_io(
                        None,
                        format!("Failed to create target directory {}", target.display()),
                        &e,
                        error_codes::CREATE_DIR_FAILED,
                    )],
                );
            }
        }

        let candidates = match self.list_candidates(source, patterns).await {
            Ok(candidates) => candidates,
            Err(e) => {
                return CopyOutcome::from_parts(
                    Vec::new(),
                    vec![failure_from_io(
                        None,
                        format!("Failed to list source directory {}", source.display()),
                        &e,
                        error_codes::SOURCE_LIST_FAILED,
                    )],
                );
            }
        };

        let mut copied_files = Vec::new();
        let mut failures = Vec::new();

        for name in &candidates {
            match self
                .copy_candidate(name, &source.join(name), &target.join(name), options)
                .await
            {
                Ok(copied) => copied_files.push(copied),
                Err(failure) => {
                    log::warn!("Copy of {} to {} failed: {}", name, target.display(), failure.message);
                    failures.push(failure);
                }
            }
        }

        log::info!(
            "Copied {}/{} file(s) from {} to {}",
            copied_files.len(),
            candidates.len(),
            source.display(),
            target.display()
        );

        CopyOutcome::from_parts(copied_files, failures)
    }

    async fn copy_candidate(
        &self,
        name: &str,
        source: &Path,
        target: &Path,
        options: &CopyOptions,
    ) -> Result<CopiedFile, FileFailure> {
        if let Err(e) = fs::File::open(source).await {
            return Err(failure_from_io(
                Some(name),
                format!("Cannot read source file {name}"),
                &e,
                error_codes::SOURCE_UNREADABLE,
            ));
        }

        if self.lock_probe.is_in_use(target).await {
            return Err(FileFailure::new(
                Some(name),
                format!("Target file {name} is in use by another process"),
                Some(error_codes::FILE_IN_USE),
            ));
        }

        let meta = fs::metadata(source).await.map_err(|e| {
            failure_from_io(Some(name), format!("Cannot stat {name}"), &e, error_codes::SOURCE_UNREADABLE)
        })?;
        let size = meta.len();

        let has_diff = if options.detect_changes {
            self.differs(source, target, size).await
        } else {
            true
        };

        fs::copy(source, target).await.map_err(|e| {
            failure_from_io(
                Some(name),
                format!("Failed to copy {name}"),
                &e,
                error_codes::COPY_FAILED,
            )
        })?;

        if options.preserve_times {
            if let Ok(modified) = meta.modified() {
                let mtime = filetime::FileTime::from_system_time(modified);
                if let Err(e) = filetime::set_file_mtime(target, mtime) {
                    log::debug!("Could not preserve mtime on {}: {}", target.display(), e);
                }
            }
        }

        if options.verify_after_copy {
            let verified = matches!(
                (self.calculate_checksum(source).await, self.calculate_checksum(target).await),
                (Ok(a), Ok(b)) if a == b
            );
            if !verified {
                return Err(FileFailure::new(
                    Some(name),
                    format!("Verification of {name} failed after copy"),
                    Some(error_codes::VERIFY_FAILED),
                ));
            }
        }

        Ok(CopiedFile {
            name: name.to_string(),
            size,
            has_diff,
        })
    }

    /// [`Self::copy`], re-run with backoff while every failure is a
    /// network-class error.
    pub async fn copy_with_retry(
        &self,
        source: &Path,
        target: &Path,
        patterns: &FilePatterns,
        options: &CopyOptions,
        policy: &RetryPolicy,
    ) -> RetryOutcome {
        let source_is_network = is_network_path(&source.to_string_lossy());
        let target_is_network = is_network_path(&target.to_string_lossy());

        let retried = with_retry(
            policy,
            move |attempt| async move {
                if attempt > 0 {
                    log::info!("Retrying copy to {} (attempt {})", target.display(), attempt + 1);
                }
                self.copy(source, target, patterns, options).await
            },
            CopyOutcome::is_retryable,
        )
        .await;

        let succeeded = retried.value.success;
        RetryOutcome {
            outcome: retried.value,
            attempts: retried.attempts,
            source_is_network,
            target_is_network,
            succeeded,
        }
    }

    /// Backs up every target file that is about to be overwritten: files in
    /// `source` matching `patterns` that already exist in `target`. Returns the
    /// backups that were written.
    pub async fn backup_existing(&self, source: &Path, target: &Path, patterns: &FilePatterns) -> Vec<PathBuf> {
        let candidates = match self.list_candidates(source, patterns).await {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!("Skipping backups, cannot list {}: {}", source.display(), e);
                return Vec::new();
            }
        };

        let mut written = Vec::new();
        for name in candidates {
            let existing = target.join(&name);
            if !fs::try_exists(&existing).await.unwrap_or(false) {
                continue;
            }
            if let Some(backup) = self.backups.create_backup(&existing).await {
                written.push(backup);
            }
        }
        written
    }

    /// Backup-then-copy into each target directory in turn.
    pub async fn copy_with_backup(
        &self,
        source: &Path,
        targets: &[PathBuf],
        patterns: &FilePatterns,
        options: &CopyOptions,
        policy: &RetryPolicy,
    ) -> Vec<(PathBuf, RetryOutcome)> {
        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            if fs::try_exists(target).await.unwrap_or(false) {
                self.backup_existing(source, target, patterns).await;
            }
            let outcome = self
                .copy_with_retry(source, target, patterns, options, policy)
                .await;
            results.push((target.clone(), outcome));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tempfile::TempDir;

    struct LockedNames(HashSet<String>);

    impl LockProbe for LockedNames {
        async fn is_in_use(&self, path: &Path) -> bool {
            path.file_name()
                .map(|n| self.0.contains(&n.to_string_lossy().to_string()))
                .unwrap_or(false)
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::from_millis(1),
            exponential_backoff: true,
        }
    }

    #[tokio::test]
    async fn test_copies_only_matching_files() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        fs::write(source_dir.path().join("configurations.mv.db"), vec![7u8; 100])
            .await
            .unwrap();
        fs::write(source_dir.path().join("readme.txt"), b"hello").await.unwrap();

        let engine = CopyEngine::new();
        let outcome = engine
            .copy(
                source_dir.path(),
                target_dir.path(),
                &FilePatterns::defaults(),
                &CopyOptions::default(),
            )
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.copied_files.len(), 1);
        assert_eq!(outcome.copied_files[0].name, "configurations.mv.db");
        assert_eq!(outcome.copied_files[0].size, 100);
        assert!(outcome.copied_files[0].has_diff);
        assert!(target_dir.path().join("configurations.mv.db").exists());
        assert!(!target_dir.path().join("readme.txt").exists());
        assert!(source_dir.path().join("readme.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_target_without_create_is_reported() {
        let source_dir = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(source_dir.path().join("a.mv.db"), b"x").await.unwrap();
        let target = root.path().join("not-there");

        let options = CopyOptions {
            create_dir_if_missing: false,
            ..CopyOptions::default()
        };
        let outcome = CopyEngine::new()
            .copy(source_dir.path(), &target, &FilePatterns::defaults(), &options)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some(error_codes::DIRECTORY_NOT_EXISTS));
        assert!(outcome.copied_files.is_empty());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_missing_target_is_created_by_default() {
        let source_dir = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::write(source_dir.path().join("a.trace.db"), b"trace").await.unwrap();
        let target = root.path().join("nested").join("target");

        let outcome = CopyEngine::new()
            .copy(source_dir.path(), &target, &FilePatterns::defaults(), &CopyOptions::default())
            .await;

        assert!(outcome.success);
        assert_eq!(fs::read(target.join("a.trace.db")).await.unwrap(), b"trace");
    }

    #[tokio::test]
    async fn test_locked_target_is_skipped_and_others_copied() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        fs::write(source_dir.path().join("configurations.mv.db"), b"mv").await.unwrap();
        fs::write(source_dir.path().join("configurations.trace.db"), b"trace")
            .await
            .unwrap();

        let locked = LockedNames(["configurations.mv.db".to_string()].into_iter().collect());
        let engine = CopyEngine::with_lock_probe(locked);
        let outcome = engine
            .copy(
                source_dir.path(),
                target_dir.path(),
                &FilePatterns::defaults(),
                &CopyOptions::default(),
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].file_name.as_deref(), Some("configurations.mv.db"));
        assert_eq!(outcome.failures[0].code.as_deref(), Some(error_codes::FILE_IN_USE));
        assert_eq!(outcome.copied_files.len(), 1);
        assert_eq!(outcome.copied_files[0].name, "configurations.trace.db");
        assert!(outcome.error.unwrap().contains("in use"));
    }

    #[tokio::test]
    async fn test_no_candidates_is_success() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        fs::write(source_dir.path().join("notes.txt"), b"x").await.unwrap();

        let outcome = CopyEngine::new()
            .copy(
                source_dir.path(),
                target_dir.path(),
                &FilePatterns::defaults(),
                &CopyOptions::default(),
            )
            .await;

        assert!(outcome.success);
        assert!(outcome.copied_files.is_empty());
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_unchanged_target_reports_no_diff() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        fs::write(source_dir.path().join("a.mv.db"), b"same").await.unwrap();
        fs::write(target_dir.path().join("a.mv.db"), b"same").await.unwrap();

        let outcome = CopyEngine::new()
            .copy(
                source_dir.path(),
                target_dir.path(),
                &FilePatterns::defaults(),
                &CopyOptions::default(),
            )
            .await;

        assert!(outcome.success);
        assert!(!outcome.copied_files[0].has_diff);
    }

    #[tokio::test]
    async fn test_copy_preserves_mtime_and_verifies() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("a.mv.db");
        fs::write(&source, b"payload").await.unwrap();
        let past = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&source, past).unwrap();

        let options = CopyOptions {
            verify_after_copy: true,
            ..CopyOptions::default()
        };
        let outcome = CopyEngine::new()
            .copy(source_dir.path(), target_dir.path(), &FilePatterns::defaults(), &options)
            .await;

        assert!(outcome.success);
        let meta = std::fs::metadata(target_dir.path().join("a.mv.db")).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), past);
    }

    #[tokio::test]
    async fn test_backup_before_overwrite_keeps_old_content() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        fs::write(source_dir.path().join("configurations.mv.db"), b"new").await.unwrap();
        fs::write(target_dir.path().join("configurations.mv.db"), b"old").await.unwrap();

        let engine = CopyEngine::new();
        let targets = vec![target_dir.path().to_path_buf()];
        let results = engine
            .copy_with_backup(
                source_dir.path(),
                &targets,
                &FilePatterns::defaults(),
                &CopyOptions::default(),
                &fast_retry(0),
            )
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].1.succeeded);
        let backup = target_dir.path().join("backups").join("configurations.mv.db.bak");
        assert_eq!(fs::read(&backup).await.unwrap(), b"old");
        assert_eq!(
            fs::read(target_dir.path().join("configurations.mv.db")).await.unwrap(),
            b"new"
        );
    }

    #[tokio::test]
    async fn test_backup_existing_skips_new_files() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        fs::write(source_dir.path().join("a.mv.db"), b"new").await.unwrap();

        let written = CopyEngine::new()
            .backup_existing(source_dir.path(), target_dir.path(), &FilePatterns::defaults())
            .await;
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn test_retry_exhausts_on_network_class_error() {
        let root = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        // Listing a missing source fails with ENOENT, which is retryable.
        let missing_source = root.path().join("gone");

        let result = CopyEngine::new()
            .copy_with_retry(
                &missing_source,
                target_dir.path(),
                &FilePatterns::defaults(),
                &CopyOptions::default(),
                &fast_retry(2),
            )
            .await;

        assert_eq!(result.attempts, 3);
        assert!(!result.succeeded);
        assert_eq!(result.outcome.failures[0].code.as_deref(), Some("ENOENT"));
    }

    #[tokio::test]
    async fn test_retry_stops_on_lock_conflict() {
        let source_dir = TempDir::new().unwrap();
        let target_dir = TempDir::new().unwrap();
        fs::write(source_dir.path().join("a.mv.db"), b"x").await.unwrap();

        let engine = CopyEngine::with_lock_probe(LockedNames(["a.mv.db".to_string()].into_iter().collect()));
        let result = engine
            .copy_with_retry(
                source_dir.path(),
                target_dir.path(),
                &FilePatterns::defaults(),
                &CopyOptions::default(),
                &fast_retry(3),
            )
            .await;

        assert_eq!(result.attempts, 1);
        assert!(!result.succeeded);
        assert!(!result.source_is_network);
        assert!(!result.target_is_network);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_missing_directory() {
        let source_dir = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let options = CopyOptions {
            create_dir_if_missing: false,
            ..CopyOptions::default()
        };

        let result = CopyEngine::new()
            .copy_with_retry(
                source_dir.path(),
                &root.path().join("absent"),
                &FilePatterns::defaults(),
                &options,
                &fast_retry(3),
            )
            .await;

        assert_eq!(result.attempts, 1);
        assert!(result.outcome.is_directory_missing());
    }
}

pub mod access;
pub mod backup;
pub mod error;
pub mod error_codes;
pub mod input_validation;
pub mod logging;
pub mod path_validation;
pub mod patterns;
pub mod store;
pub mod sync_engine;
pub mod watcher;


use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use access::{AccessibilityCache, MonitoredLocation};
use backup::{BackupManager, BACKUP_DIR_NAME};
use input_validation::{validate_copy_patterns, validate_path_argument};
use logging::LogManager;
use patterns::FilePatterns;
use store::{
    CopyResult, HistoryEntry, HistoryStore, HistoryTarget, JsonStore, PresetStore,
    SettingsStore, TargetLocation, TargetLocationStore,
};
use sync_engine::{CopyEngine, CopyOptions, RetryOutcome, RetryPolicy};
use watcher::{SourceChange, SourceWatcher};

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// One copy run requested by the user.
#[derive(Debug, Clone, Default)]
pub struct CopyRequest {
    pub source: PathBuf,
    pub target_ids: Vec<String>,
    pub description: Option<String>,
}

/// Reported after each target finishes.
#[derive(Debug, Clone)]
pub struct CopyProgress {
    pub completed: usize,
    pub total: usize,
    pub target_name: String,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct TargetReport {
    pub target: TargetLocation,
    pub accessible: bool,
    /// `None` when the target was skipped before copying.
    pub retry: Option<RetryOutcome>,
    pub duration_ms: u64,
}

impl TargetReport {
    pub fn succeeded(&self) -> bool {
        self.retry.as_ref().map(|r| r.succeeded).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct CopyReport {
    pub entry: HistoryEntry,
    pub targets: Vec<TargetReport>,
}

impl CopyReport {
    pub fn succeeded(&self) -> bool {
        self.targets.iter().all(TargetReport::succeeded)
    }

    pub fn failed_targets(&self) -> Vec<&TargetLocation> {
        self.targets
            .iter()
            .filter(|t| !t.succeeded())
            .map(|t| &t.target)
            .collect()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds the per-file history records for one target.
fn copy_results_for(report: &TargetReport) -> Vec<CopyResult> {
    let target = &report.target;
    let base = CopyResult {
        target_id: target.id.clone(),
        target_path: Some(target.path.clone()),
        target_name: Some(target.name.clone()),
        success: false,
        error: None,
        file_size: None,
        duration: Some(report.duration_ms),
        file_name: None,
        has_diff: None,
    };

    let Some(retry) = &report.retry else {
        return vec![CopyResult {
            error: Some(error_codes::TARGET_NOT_ACCESSIBLE.to_string()),
            ..base
        }];
    };

    let outcome = &retry.outcome;
    let mut results: Vec<CopyResult> = outcome
        .copied_files
        .iter()
        .map(|file| CopyResult {
            success: true,
            file_size: Some(file.size),
            file_name: Some(file.name.clone()),
            has_diff: Some(file.has_diff),
            ..base.clone()
        })
        .collect();
    results.extend(outcome.failures.iter().map(|failure| CopyResult {
        error: Some(failure.message.clone()),
        file_name: failure.file_name.clone(),
        ..base.clone()
    }));

    if results.is_empty() {
        results.push(CopyResult {
            success: outcome.success,
            error: outcome.error.clone(),
            ..base
        });
    }
    results
}

pub struct AppState {
    pub data_dir: PathBuf,
    pub json: JsonStore,
    pub locations: TargetLocationStore,
    pub presets: PresetStore,
    pub history: HistoryStore,
    pub settings: SettingsStore,
    pub engine: Arc<CopyEngine>,
    pub access: AccessibilityCache,
    pub log_manager: Arc<LogManager>,
    pub retry_policy: RetryPolicy,
    source_watcher: Mutex<Option<SourceWatcher>>,
    notice_forwarder: JoinHandle<()>,
}

impl AppState {
    /// Opens the documents in `data_dir`, creating it when needed. Must be
    /// called inside a tokio runtime.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let json = JsonStore::new(&data_dir);
        let log_manager = Arc::new(LogManager::default());
        let notice_forwarder = Self::forward_notices(&json, log_manager.clone());

        let settings = SettingsStore::new(json.clone());
        let loaded = settings.load().await;
        json.set_snapshot_retention(loaded.backup_retention_count as usize);

        let state = Self {
            locations: TargetLocationStore::new(json.clone()),
            presets: PresetStore::new(json.clone(), settings.clone()),
            history: HistoryStore::new(json.clone()),
            settings,
            json,
            data_dir,
            engine: Arc::new(CopyEngine::new()),
            access: AccessibilityCache::new(),
            log_manager,
            retry_policy: RetryPolicy::default(),
            source_watcher: Mutex::new(None),
            notice_forwarder,
        };
        state.sync_monitored_locations().await;
        log::info!("Opened data directory {}", state.data_dir.display());
        Ok(state)
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn forward_notices(json: &JsonStore, log_manager: Arc<LogManager>) -> JoinHandle<()> {
        let mut notices = json.subscribe();
        tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => log_manager.record_notice(&notice),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Dropped {} store notices", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Points the accessibility monitor at the stored target locations.
    pub async fn sync_monitored_locations(&self) -> Vec<MonitoredLocation> {
        let monitored: Vec<MonitoredLocation> = self
            .locations
            .list()
            .await
            .iter()
            .map(|l| MonitoredLocation::new(l.id.clone(), l.path.clone()))
            .collect();
        self.access.set_locations(monitored.clone());
        monitored
    }

    pub async fn check_locations(&self, forced: bool) -> HashMap<String, bool> {
        self.sync_monitored_locations().await;
        if forced {
            self.access.force_check().await
        } else {
            self.access.check_current(false).await
        }
    }

    pub async fn file_patterns(&self) -> Result<FilePatterns> {
        let settings = self.settings.load().await;
        validate_copy_patterns(&settings.file_patterns)
    }

    pub async fn copy_to_targets(&self, request: CopyRequest) -> Result<CopyReport> {
        self.copy_to_targets_with_progress(request, |_| {}).await
    }

    /// Copies the pattern-matched files from `request.source` into every
    /// requested target and records the run in history.
    ///
    /// Targets that fail the accessibility check are skipped and recorded as
    /// failed. A missing target root is never created.
    pub async fn copy_to_targets_with_progress<F>(
        &self,
        request: CopyRequest,
        mut on_progress: F,
    ) -> Result<CopyReport>
    where
        F: FnMut(CopyProgress),
    {
        let source_str = request.source.to_string_lossy().to_string();
        validate_path_argument(&source_str)?;
        if !tokio::fs::metadata(&request.source)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            bail!("Source directory does not exist: {}", request.source.display());
        }
        if request.target_ids.is_empty() {
            bail!("No target locations selected");
        }

        let settings = self.settings.load().await;
        let patterns = validate_copy_patterns(&settings.file_patterns)?;
        let all_locations = self.locations.list().await;

        let mut targets = Vec::with_capacity(request.target_ids.len());
        for id in &request.target_ids {
            match all_locations.iter().find(|l| &l.id == id) {
                Some(location) => targets.push(location.clone()),
                None => {
                    self.log_manager
                        .warn(&format!("Unknown target location {}", id), Some(id.clone()));
                }
            }
        }
        if targets.is_empty() {
            bail!("None of the selected target locations exist");
        }

        let monitored: Vec<MonitoredLocation> = targets
            .iter()
            .map(|t| MonitoredLocation::new(t.id.clone(), t.path.clone()))
            .collect();
        let reachable = self.access.check(&monitored, true).await;

        let options = CopyOptions {
            create_dir_if_missing: false,
            ..CopyOptions::default()
        };
        self.log_manager.info(
            &format!(
                "Copying {} to {} target(s)",
                request.source.display(),
                targets.len()
            ),
            None,
        );

        let total = targets.len();
        let mut reports = Vec::with_capacity(total);
        for (index, target) in targets.into_iter().enumerate() {
            let report = self
                .copy_one_target(&request.source, target, &reachable, &patterns, &options, &settings)
                .await;
            on_progress(CopyProgress {
                completed: index + 1,
                total,
                target_name: report.target.name.clone(),
                success: report.succeeded(),
            });
            reports.push(report);
        }

        if reports.iter().any(|r| !r.succeeded()) {
            self.access.refresh();
        }

        let copy_results: Vec<CopyResult> = reports
            .iter()
            .flat_map(copy_results_for)
            .collect();
        let copied = copy_results
            .iter()
            .filter(|r| r.success && r.file_name.is_some())
            .count();
        let description = request
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Copied {} file(s) to {} target(s)", copied, reports.len()));

        let entry = HistoryEntry {
            id: 0,
            timestamp: chrono::Utc::now().timestamp_millis(),
            description,
            source_path: source_str.clone(),
            version: None,
            target_locations: reports.iter().map(|r| HistoryTarget::from(&r.target)).collect(),
            copy_results: Some(copy_results),
        };
        let entry = self.history.add_with_next_version(entry).await?;

        if let Err(e) = self.settings.remember_source(&source_str).await {
            log::warn!("Failed to remember source path: {}", e);
        }
        self.apply_retention(&reports).await;

        let report = CopyReport {
            entry,
            targets: reports,
        };
        let summary = format!(
            "Copy {} finished: {}/{} target(s) succeeded",
            report.entry.version.as_deref().unwrap_or("-"),
            report.targets.iter().filter(|t| t.succeeded()).count(),
            report.targets.len()
        );
        if report.succeeded() {
            self.log_manager.info(&summary, None);
        } else {
            self.log_manager.warn(&summary, None);
        }
        Ok(report)
    }

    async fn copy_one_target(
        &self,
        source: &Path,
        target: TargetLocation,
        reachable: &HashMap<String, bool>,
        patterns: &FilePatterns,
        options: &CopyOptions,
        settings: &store::Settings,
    ) -> TargetReport {
        let started = Instant::now();
        let accessible = reachable.get(&target.id).copied().unwrap_or(false);
        if !accessible {
            self.log_manager.error(
                &format!("{} ({}) is not accessible, skipped", target.name, target.path),
                Some(target.id.clone()),
            );
            return TargetReport {
                target,
                accessible,
                retry: None,
                duration_ms: 0,
            };
        }

        let target_dir = PathBuf::from(&target.path);
        if settings.create_backup_before_overwrite {
            let backups = self.engine.backup_existing(source, &target_dir, patterns).await;
            if !backups.is_empty() {
                log::debug!("Backed up {} file(s) in {}", backups.len(), target.path);
            }
        }

        let retry = self
            .engine
            .copy_with_retry(source, &target_dir, patterns, options, &self.retry_policy)
            .await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let target_id = Some(target.id.clone());
        for file in &retry.outcome.copied_files {
            let change = if file.has_diff { "changed" } else { "unchanged" };
            self.log_manager.info(
                &format!("Copied {} ({} bytes, {}) to {}", file.name, file.size, change, target.name),
                target_id.clone(),
            );
        }
        if !retry.outcome.copied_files.is_empty() {
            log::debug!(
                "{} file(s), {} bytes written to {}",
                retry.outcome.copied_files.len(),
                retry.outcome.bytes_copied(),
                target.path
            );
        }
        for failure in &retry.outcome.failures {
            self.log_manager.error(
                &format!("{}: {}", target.name, failure.message),
                target_id.clone(),
            );
        }
        if retry.attempts > 1 {
            self.log_manager.warn(
                &format!("{} needed {} attempts", target.name, retry.attempts),
                target_id,
            );
        }

        TargetReport {
            target,
            accessible,
            retry: Some(retry),
            duration_ms,
        }
    }

    async fn apply_retention(&self, reports: &[TargetReport]) {
        let settings = self.settings.load().await;
        if let Err(e) = self
            .history
            .prune_older_than(settings.history_retention_days)
            .await
        {
            log::warn!("Failed to prune history: {}", e);
        }

        if !settings.enable_old_backup_deletion {
            return;
        }
        let backups = BackupManager::new();
        let days = settings.delete_backups_older_than_days;
        let mut removed = backups
            .delete_backups_older_than(&self.json.backup_dir(), days)
            .await;
        for report in reports.iter().filter(|r| r.accessible) {
            let dir = Path::new(&report.target.path).join(BACKUP_DIR_NAME);
            removed += backups.delete_backups_older_than(&dir, days).await;
        }
        if removed > 0 {
            self.log_manager.info(
                &format!("Deleted {} backup(s) older than {} days", removed, days),
                None,
            );
        }
    }

    /// Watches `source` for changes to copyable files when the user has
    /// enabled it. Returns whether a watcher is running afterwards.
    pub async fn watch_source<F>(&self, source: PathBuf, on_change: F) -> Result<bool>
    where
        F: Fn(SourceChange) + Send + 'static,
    {
        self.stop_watching_source();
        let settings = self.settings.load().await;
        if !settings.auto_check_source_changes {
            return Ok(false);
        }
        let patterns = validate_copy_patterns(&settings.file_patterns)?;
        let watcher = SourceWatcher::start(source, patterns, on_change)?;
        *lock(&self.source_watcher) = Some(watcher);
        Ok(true)
    }

    pub fn stop_watching_source(&self) {
        if let Some(mut watcher) = lock(&self.source_watcher).take() {
            watcher.stop();
        }
    }

    pub fn is_watching_source(&self) -> bool {
        lock(&self.source_watcher)
            .as_ref()
            .map(SourceWatcher::is_watching)
            .unwrap_or(false)
    }

    pub fn shutdown(&self) {
        self.stop_watching_source();
        self.access.shutdown();
        self.notice_forwarder.abort();
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.notice_forwarder.abort();
    }
}

//! 소스 디렉터리 감시 모듈
//!
//! 소스 폴더에서 복사 대상 패턴에 맞는 파일이 바뀌면 디바운스 후 콜백을 호출합니다.

use crate::patterns::FilePatterns;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

const EVENT_BUFFER: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Modify,
    Remove,
}

impl ChangeKind {
    fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(ChangeKind::Create),
            EventKind::Modify(_) => Some(ChangeKind::Modify),
            EventKind::Remove(_) => Some(ChangeKind::Remove),
            _ => None,
        }
    }
}

/// 디바운스된 변경 묶음
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceChange {
    pub source: PathBuf,
    /// 마지막으로 관찰된 이벤트 종류
    pub kind: ChangeKind,
    pub paths: Vec<PathBuf>,
}

impl SourceChange {
    pub fn file_names(&self) -> Vec<String> {
        self.paths
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect()
    }
}

fn matches_patterns(path: &Path, patterns: &FilePatterns) -> bool {
    path.file_name()
        .map(|name| patterns.matches(&name.to_string_lossy()))
        .unwrap_or(false)
}

/// 소스 디렉터리 하나를 감시합니다. Drop 시 감시를 멈춥니다.
pub struct SourceWatcher {
    source: PathBuf,
    _watcher: RecommendedWatcher,
    cancellation_token: CancellationToken,
    debounce_thread: Option<thread::JoinHandle<()>>,
}

impl SourceWatcher {
    pub fn start<F>(source: PathBuf, patterns: FilePatterns, on_change: F) -> Result<Self>
    where
        F: Fn(SourceChange) + Send + 'static,
    {
        Self::start_with_debounce(source, patterns, DEFAULT_DEBOUNCE, on_change)
    }

    pub fn start_with_debounce<F>(
        source: PathBuf,
        patterns: FilePatterns,
        debounce: Duration,
        on_change: F,
    ) -> Result<Self>
    where
        F: Fn(SourceChange) + Send + 'static,
    {
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();

        // 버퍼가 차면 이벤트를 버립니다. 묶음 하나면 충분합니다.
        let (tx, rx) = mpsc::sync_channel::<(ChangeKind, Vec<PathBuf>)>(EVENT_BUFFER);

        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("Source watch error: {}", e);
                        return;
                    }
                };
                let Some(kind) = ChangeKind::from_event(&event.kind) else {
                    return;
                };
                let paths: Vec<PathBuf> = event
                    .paths
                    .into_iter()
                    .filter(|p| matches_patterns(p, &patterns))
                    .collect();
                if !paths.is_empty() && tx.try_send((kind, paths)).is_err() {
                    log::debug!("Source change buffer full, dropping event");
                }
            })
            .context("Failed to create file watcher")?;

        watcher
            .watch(&source, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", source.display()))?;

        let watched = source.clone();
        let debounce_thread = thread::spawn(move || {
            let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
            let mut last_kind = ChangeKind::Modify;

            while !token.is_cancelled() {
                match rx.recv_timeout(debounce) {
                    Ok((kind, paths)) => {
                        pending.extend(paths);
                        last_kind = kind;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if pending.is_empty() || token.is_cancelled() {
                            continue;
                        }
                        on_change(SourceChange {
                            source: watched.clone(),
                            kind: last_kind,
                            paths: std::mem::take(&mut pending).into_iter().collect(),
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        log::info!("Watching source {}", source.display());
        Ok(Self {
            source,
            _watcher: watcher,
            cancellation_token,
            debounce_thread: Some(debounce_thread),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn is_watching(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    pub fn stop(&mut self) {
        if self.cancellation_token.is_cancelled() {
            return;
        }
        self.cancellation_token.cancel();
        // 스레드는 다음 타임아웃에서 스스로 종료합니다.
        drop(self.debounce_thread.take());
        log::info!("Stopped watching {}", self.source.display());
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

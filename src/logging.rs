//! User-facing activity log.
//!
//! Diagnostics go through the `log` facade; this module keeps the lines the
//! user should see (copy runs, backup failures, store recovery) in a bounded
//! in-memory ring and fans new entries out to subscribers.

use crate::store::StoreNotice;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default maximum number of log lines to keep in memory
pub const DEFAULT_MAX_LOG_LINES: usize = 10000;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub target_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, target_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.into(),
            target_id,
        }
    }
}

/// Published for every batch of new entries.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub target_id: Option<String>,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone)]
pub struct LogManager {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    max_lines: usize,
    events: broadcast::Sender<LogEvent>,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_LINES)
    }
}

impl LogManager {
    pub fn new(max_lines: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(max_lines.min(1024)))),
            max_lines: max_lines.max(1),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    pub fn log(&self, level: LogLevel, message: &str, target_id: Option<String>) {
        match level {
            LogLevel::Error => log::error!("{}", message),
            LogLevel::Warning => log::warn!("{}", message),
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Debug => log::debug!("{}", message),
        }
        let entry = LogEntry::new(level, message, target_id.clone());
        self.log_batch(vec![entry], target_id);
    }

    pub fn info(&self, message: &str, target_id: Option<String>) {
        self.log(LogLevel::Info, message, target_id);
    }

    pub fn warn(&self, message: &str, target_id: Option<String>) {
        self.log(LogLevel::Warning, message, target_id);
    }

    pub fn error(&self, message: &str, target_id: Option<String>) {
        self.log(LogLevel::Error, message, target_id);
    }

    /// Add multiple entries at once and publish them as one event
    pub fn log_batch(&self, entries: Vec<LogEntry>, target_id: Option<String>) {
        if entries.is_empty() {
            return;
        }

        {
            let mut logs = self.lock();
            logs.extend(entries.iter().cloned());
            while logs.len() > self.max_lines {
                logs.pop_front();
            }
        }

        let _ = self.events.send(LogEvent { target_id, entries });
    }

    /// Records a JSON store recovery event.
    pub fn record_notice(&self, notice: &StoreNotice) {
        let level = if notice.is_warning() {
            LogLevel::Warning
        } else {
            LogLevel::Info
        };
        let entry = LogEntry::new(level, notice.message(), None);
        self.log_batch(vec![entry], None);
    }

    pub fn get_logs(&self, target_id: Option<&str>) -> Vec<LogEntry> {
        let logs = self.lock();
        match target_id {
            Some(id) => logs
                .iter()
                .filter(|l| l.target_id.as_deref() == Some(id))
                .cloned()
                .collect(),
            None => logs.iter().cloned().collect(),
        }
    }

    pub fn get_logs_paginated(
        &self,
        target_id: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Vec<LogEntry> {
        let logs = self.lock();
        logs.iter()
            .filter(|l| target_id.is_none() || l.target_id.as_deref() == target_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_manager_log() {
        let manager = LogManager::new(10);
        assert!(manager.is_empty());

        manager.info("copy started", None);
        manager.warn("target busy", Some("target-1".to_string()));
        assert_eq!(manager.len(), 2);

        let logs = manager.get_logs(None);
        assert_eq!(logs[1].level, LogLevel::Warning);
        assert_ne!(logs[0].id, logs[1].id);
    }

    #[test]
    fn test_log_manager_rotation() {
        let manager = LogManager::new(3);
        for i in 0..5 {
            manager.info(&format!("message {}", i), None);
        }

        let logs = manager.get_logs(None);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message, "message 2");
    }

    #[test]
    fn test_get_logs_by_target() {
        let manager = LogManager::new(10);
        manager.info("message1", None);
        manager.info("message2", Some("t1".to_string()));
        manager.error("message3", Some("t1".to_string()));

        assert_eq!(manager.get_logs(None).len(), 3);
        assert_eq!(manager.get_logs(Some("t1")).len(), 2);
        assert!(manager.get_logs(Some("nonexistent")).is_empty());
    }

    #[test]
    fn test_pagination() {
        let manager = LogManager::new(100);
        for i in 0..20 {
            manager.info(&format!("message {}", i), Some(format!("t{}", i % 2)));
        }

        assert_eq!(manager.get_logs_paginated(None, 0, 10).len(), 10);
        assert_eq!(manager.get_logs_paginated(None, 10, 10).len(), 10);
        assert!(manager.get_logs_paginated(None, 20, 10).is_empty());

        let odd = manager.get_logs_paginated(Some("t1"), 2, 3);
        assert_eq!(odd.len(), 3);
        assert_eq!(odd[0].message, "message 5");
    }

    #[test]
    fn test_batch_is_published_once() {
        let manager = LogManager::new(10);
        let mut events = manager.subscribe();
        manager.log_batch(
            vec![
                LogEntry::new(LogLevel::Info, "a", None),
                LogEntry::new(LogLevel::Info, "b", None),
            ],
            None,
        );

        let event = events.try_recv().unwrap();
        assert_eq!(event.entries.len(), 2);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_record_notice_level() {
        let manager = LogManager::new(10);
        manager.record_notice(&StoreNotice::RecoveryFailed {
            document: "history.json".to_string(),
            error: "bad".to_string(),
        });
        manager.record_notice(&StoreNotice::Initialized {
            document: "presets.json".to_string(),
        });

        let logs = manager.get_logs(None);
        assert_eq!(logs[0].level, LogLevel::Warning);
        assert!(logs[0].message.contains("history.json"));
        assert_eq!(logs[1].level, LogLevel::Info);
    }

    #[test]
    fn test_level_serializes_lowercase() {
        let entry = LogEntry::new(LogLevel::Warning, "x", Some("t".to_string()));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["level"], "warning");
        assert_eq!(value["targetId"], "t");
    }
}

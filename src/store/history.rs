use crate::error::{StoreError, StoreResult};
use crate::store::atomic::JsonStore;
use crate::store::types::{next_version, HistoryEntry, HistoryUpdate, HISTORY_DOC};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Wall-clock millis, or one past the newest id. Falls back to the lowest
/// unused id once the id space is exhausted.
fn fresh_id(entries: &[HistoryEntry]) -> u64 {
    let newest = entries.iter().map(|e| e.id).max().unwrap_or(0);
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    match newest.checked_add(1) {
        Some(next) => now.max(next),
        None => {
            let used: HashSet<u64> = entries.iter().map(|e| e.id).collect();
            (1..).find(|id| !used.contains(id)).unwrap_or(1)
        }
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
}

/// Copy history, most recent first.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    store: JsonStore,
}

impl HistoryStore {
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Vec<HistoryEntry> {
        self.store.read(HISTORY_DOC, Vec::new()).await.data
    }

    pub async fn get(&self, id: u64) -> Option<HistoryEntry> {
        self.list().await.into_iter().find(|e| e.id == id)
    }

    /// Prepends `entry`. An id of 0 or one already in use is replaced with a
    /// fresh one derived from the wall clock.
    pub async fn add(&self, entry: HistoryEntry) -> StoreResult<HistoryEntry> {
        self.insert(entry, false).await
    }

    /// Like [`add`](Self::add), but tags the entry with the next `vN` under
    /// the same lock hold, so overlapping runs never share a version.
    pub async fn add_with_next_version(&self, entry: HistoryEntry) -> StoreResult<HistoryEntry> {
        self.insert(entry, true).await
    }

    async fn insert(&self, mut entry: HistoryEntry, assign_version: bool) -> StoreResult<HistoryEntry> {
        self.store
            .update(HISTORY_DOC, Vec::new(), |entries: &mut Vec<HistoryEntry>| {
                if entry.id == 0 || entries.iter().any(|e| e.id == entry.id) {
                    entry.id = fresh_id(entries);
                }
                if assign_version {
                    entry.version = Some(next_version(entries));
                }
                entries.insert(0, entry.clone());
                Ok(entry)
            })
            .await
    }

    pub async fn update(&self, id: u64, patch: HistoryUpdate) -> StoreResult<HistoryEntry> {
        self.store
            .update(HISTORY_DOC, Vec::new(), |entries: &mut Vec<HistoryEntry>| {
                let entry = entries
                    .iter_mut()
                    .find(|e| e.id == id)
                    .ok_or_else(|| StoreError::NotFound(format!("history entry {}", id)))?;
                if let Some(description) = patch.description {
                    entry.description = description;
                }
                Ok(entry.clone())
            })
            .await
    }

    pub async fn remove(&self, id: u64) -> StoreResult<bool> {
        Ok(self.remove_many(&[id]).await? > 0)
    }

    pub async fn remove_many(&self, ids: &[u64]) -> StoreResult<usize> {
        let ids: HashSet<u64> = ids.iter().copied().collect();
        self.store
            .update(HISTORY_DOC, Vec::new(), |entries: &mut Vec<HistoryEntry>| {
                let before = entries.len();
                entries.retain(|e| !ids.contains(&e.id));
                Ok(before - entries.len())
            })
            .await
    }

    pub async fn clear(&self) -> StoreResult<()> {
        self.store
            .write(HISTORY_DOC, &Vec::<HistoryEntry>::new())
            .await
    }

    /// `page` is 1-based; out-of-range pages come back empty.
    pub async fn page(&self, page: usize, per_page: usize) -> HistoryPage {
        let entries = self.list().await;
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total = entries.len();
        let total_pages = total.div_ceil(per_page);
        let entries = entries
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();
        HistoryPage {
            entries,
            page,
            per_page,
            total,
            total_pages,
        }
    }

    /// Drops entries older than `days`. Zero keeps everything.
    pub async fn prune_older_than(&self, days: u32) -> StoreResult<usize> {
        if days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now().timestamp_millis() - i64::from(days) * DAY_MS;
        let removed = self
            .store
            .update(HISTORY_DOC, Vec::new(), |entries: &mut Vec<HistoryEntry>| {
                let before = entries.len();
                entries.retain(|e| e.timestamp >= cutoff);
                Ok(before - entries.len())
            })
            .await?;
        if removed > 0 {
            log::info!("Pruned {} history entries older than {} days", removed, days);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: u64, timestamp: i64, description: &str) -> HistoryEntry {
        HistoryEntry {
            id,
            timestamp,
            description: description.to_string(),
            source_path: "/data/src".to_string(),
            version: None,
            target_locations: vec![],
            copy_results: None,
        }
    }

    fn history(dir: &TempDir) -> HistoryStore {
        HistoryStore::new(JsonStore::new(dir.path()))
    }

    #[tokio::test]
    async fn test_add_prepends() {
        let dir = TempDir::new().unwrap();
        let store = history(&dir);
        let now = Utc::now().timestamp_millis();
        store.add(entry(0, now, "first")).await.unwrap();
        store.add(entry(0, now, "second")).await.unwrap();

        let list = store.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].description, "second");
        assert_eq!(list[1].description, "first");
        assert!(list[0].id > list[1].id);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_reassigned() {
        let dir = TempDir::new().unwrap();
        let store = history(&dir);
        let a = store.add(entry(5, 0, "a")).await.unwrap();
        let b = store.add(entry(5, 0, "b")).await.unwrap();
        assert_eq!(a.id, 5);
        assert_ne!(b.id, 5);
    }

    #[tokio::test]
    async fn test_id_at_u64_max_does_not_wrap() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(HISTORY_DOC),
            r#"[{"id":18446744073709551615,"timestamp":0,"sourcePath":"/s"}]"#,
        )
        .unwrap();
        let store = history(&dir);

        let added = store.add(entry(0, 0, "next")).await.unwrap();
        assert_ne!(added.id, 0);
        assert_ne!(added.id, u64::MAX);
        assert_eq!(store.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_runs_get_distinct_versions() {
        let dir = TempDir::new().unwrap();
        let store = history(&dir);

        let adds = (0..5).map(|_| store.add_with_next_version(entry(0, 0, "run")));
        let added = futures::future::join_all(adds).await;

        let mut versions: Vec<String> = added
            .into_iter()
            .map(|e| e.unwrap().version.unwrap())
            .collect();
        versions.sort();
        assert_eq!(versions, vec!["v1", "v2", "v3", "v4", "v5"]);
        assert_eq!(store.list().await[0].version.as_deref(), Some("v5"));
    }

    #[tokio::test]
    async fn test_update_description_only() {
        let dir = TempDir::new().unwrap();
        let store = history(&dir);
        let added = store.add(entry(7, 10, "old")).await.unwrap();

        let updated = store
            .update(
                added.id,
                HistoryUpdate {
                    description: Some("new".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description, "new");
        assert_eq!(updated.timestamp, 10);

        let missing = store.update(999, HistoryUpdate::default()).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = history(&dir);
        for id in 1..=4 {
            store.add(entry(id, 0, "x")).await.unwrap();
        }

        assert!(store.remove(2).await.unwrap());
        assert!(!store.remove(2).await.unwrap());
        assert_eq!(store.remove_many(&[1, 3, 99]).await.unwrap(), 2);
        assert_eq!(store.list().await.len(), 1);
        assert!(store.get(4).await.is_some());

        store.clear().await.unwrap();
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_page() {
        let dir = TempDir::new().unwrap();
        let store = history(&dir);
        for id in 1..=5 {
            store.add(entry(id, 0, "x")).await.unwrap();
        }

        let first = store.page(1, 2).await;
        assert_eq!(first.total, 5);
        assert_eq!(first.total_pages, 3);
        assert_eq!(
            first.entries.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![5, 4]
        );
        assert_eq!(store.page(3, 2).await.entries.len(), 1);
        assert!(store.page(4, 2).await.entries.is_empty());
    }

    #[tokio::test]
    async fn test_prune_older_than() {
        let dir = TempDir::new().unwrap();
        let store = history(&dir);
        let now = Utc::now().timestamp_millis();
        store.add(entry(1, now - 40 * DAY_MS, "old")).await.unwrap();
        store.add(entry(2, now - DAY_MS, "recent")).await.unwrap();

        assert_eq!(store.prune_older_than(0).await.unwrap(), 0);
        assert_eq!(store.prune_older_than(30).await.unwrap(), 1);
        let list = store.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].description, "recent");
    }
}

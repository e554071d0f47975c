use crate::error::StoreResult;
use crate::store::atomic::JsonStore;
use crate::store::types::{Settings, SETTINGS_DOC};
use serde_json::Value;

/// The singleton settings document, merged with defaults on every load.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    store: JsonStore,
}

impl SettingsStore {
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Settings {
        let stored = self
            .store
            .read(SETTINGS_DOC, Settings::default().to_json())
            .await
            .data;
        Settings::from_json(stored)
    }

    pub async fn save(&self, settings: &Settings) -> StoreResult<Settings> {
        let normalized = Settings::from_json(settings.to_json());
        self.store.write(SETTINGS_DOC, &normalized.to_json()).await?;
        self.store
            .set_snapshot_retention(normalized.backup_retention_count as usize);
        Ok(normalized)
    }

    /// Applies `change` to the current settings and saves the result.
    pub async fn update<F>(&self, change: F) -> StoreResult<Settings>
    where
        F: FnOnce(&mut Settings) + Send,
    {
        let settings = self
            .store
            .update(
                SETTINGS_DOC,
                Settings::default().to_json(),
                |stored: &mut Value| {
                    let mut settings = Settings::from_json(stored.take());
                    change(&mut settings);
                    let settings = Settings::from_json(settings.to_json());
                    *stored = settings.to_json();
                    Ok(settings)
                },
            )
            .await?;
        self.store
            .set_snapshot_retention(settings.backup_retention_count as usize);
        Ok(settings)
    }

    pub async fn set_default_preset(&self, preset_id: Option<String>) -> StoreResult<Settings> {
        self.update(|s| s.default_preset_id = preset_id).await
    }

    /// Stores `path` as the last used source when the user wants that remembered.
    pub async fn remember_source(&self, path: &str) -> StoreResult<Settings> {
        let path = path.to_string();
        self.update(|s| {
            if s.remember_source_path {
                s.last_source_path = Some(path);
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        let settings = SettingsStore::new(JsonStore::new(dir.path()));
        assert_eq!(settings.load().await, Settings::default());
        assert!(dir.path().join(SETTINGS_DOC).exists());
    }

    #[tokio::test]
    async fn test_partial_document_is_merged() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_DOC),
            r#"{"darkMode": true, "historyRetentionDays": -3}"#,
        )
        .unwrap();
        let settings = SettingsStore::new(JsonStore::new(dir.path()));

        let loaded = settings.load().await;
        assert!(loaded.dark_mode);
        assert_eq!(loaded.history_retention_days, 0);
        assert!(loaded.create_backup_before_overwrite);
    }

    #[tokio::test]
    async fn test_update_and_remember_source() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        let settings = SettingsStore::new(store.clone());

        let saved = settings
            .update(|s| s.backup_retention_count = 4)
            .await
            .unwrap();
        assert_eq!(saved.backup_retention_count, 4);
        assert_eq!(store.snapshot_retention(), 4);

        settings.remember_source("/data/db").await.unwrap();
        assert_eq!(
            settings.load().await.last_source_path.as_deref(),
            Some("/data/db")
        );

        settings.update(|s| s.remember_source_path = false).await.unwrap();
        settings.remember_source("/elsewhere").await.unwrap();
        assert_eq!(
            settings.load().await.last_source_path.as_deref(),
            Some("/data/db")
        );
    }

    #[tokio::test]
    async fn test_set_default_preset() {
        let dir = TempDir::new().unwrap();
        let settings = SettingsStore::new(JsonStore::new(dir.path()));
        settings
            .set_default_preset(Some("preset-1".to_string()))
            .await
            .unwrap();
        assert_eq!(
            settings.load().await.default_preset_id.as_deref(),
            Some("preset-1")
        );
        settings.set_default_preset(None).await.unwrap();
        assert_eq!(settings.load().await.default_preset_id, None);
    }
}

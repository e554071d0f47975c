use crate::error::{StoreError, StoreResult};
use crate::store::atomic::JsonStore;
use crate::store::settings::SettingsStore;
use crate::store::types::{Preset, ResolvedTarget, Settings, TargetLocation, PRESETS_DOC, UNKNOWN_TARGET};

/// Named sets of target locations.
#[derive(Debug, Clone)]
pub struct PresetStore {
    store: JsonStore,
    settings: SettingsStore,
}

impl PresetStore {
    pub fn new(store: JsonStore, settings: SettingsStore) -> Self {
        Self { store, settings }
    }

    pub async fn list(&self) -> Vec<Preset> {
        self.store.read(PRESETS_DOC, Vec::new()).await.data
    }

    pub async fn get(&self, id: &str) -> Option<Preset> {
        self.list().await.into_iter().find(|p| p.id == id)
    }

    /// Inserts `preset`, or replaces the stored one with the same id in place.
    pub async fn save(&self, preset: Preset) -> StoreResult<Preset> {
        if preset.name.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "preset name must not be empty".to_string(),
            ));
        }
        self.store
            .update(PRESETS_DOC, Vec::new(), |presets: &mut Vec<Preset>| {
                match presets.iter_mut().find(|p| p.id == preset.id) {
                    Some(existing) => *existing = preset.clone(),
                    None => presets.push(preset.clone()),
                }
                Ok(preset)
            })
            .await
    }

    /// Removes the preset. A default pointing at it is cleared.
    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        let removed = self
            .store
            .update(PRESETS_DOC, Vec::new(), |presets: &mut Vec<Preset>| {
                let before = presets.len();
                presets.retain(|p| p.id != id);
                Ok(presets.len() < before)
            })
            .await?;

        if removed && self.settings.load().await.default_preset_id.as_deref() == Some(id) {
            self.settings.set_default_preset(None).await?;
        }
        Ok(removed)
    }

    /// Records `id` as the default preset in settings. `None` clears it.
    pub async fn set_default(&self, id: Option<&str>) -> StoreResult<Settings> {
        if let Some(id) = id {
            if self.get(id).await.is_none() {
                return Err(StoreError::NotFound(format!("preset {}", id)));
            }
        }
        self.settings
            .set_default_preset(id.map(str::to_string))
            .await
    }

    pub async fn default_preset(&self) -> Option<Preset> {
        let id = self.settings.load().await.default_preset_id?;
        self.get(&id).await
    }

    /// Maps the preset's target ids onto `locations`, in preset order.
    pub fn resolve_targets(preset: &Preset, locations: &[TargetLocation]) -> Vec<ResolvedTarget> {
        preset
            .target_ids
            .iter()
            .map(|id| match locations.iter().find(|l| &l.id == id) {
                Some(location) => ResolvedTarget {
                    id: id.clone(),
                    name: location.name.clone(),
                    path: location.path.clone(),
                    exists: true,
                },
                None => ResolvedTarget {
                    id: id.clone(),
                    name: UNKNOWN_TARGET.to_string(),
                    path: UNKNOWN_TARGET.to_string(),
                    exists: false,
                },
            })
            .collect()
    }

    /// Drops `target_id` from every preset. Returns how many presets changed.
    pub async fn remove_target_everywhere(&self, target_id: &str) -> StoreResult<usize> {
        self.store
            .update(PRESETS_DOC, Vec::new(), |presets: &mut Vec<Preset>| {
                let mut changed = 0;
                for preset in presets.iter_mut() {
                    let before = preset.target_ids.len();
                    preset.target_ids.retain(|id| id != target_id);
                    if preset.target_ids.len() != before {
                        changed += 1;
                    }
                }
                Ok(changed)
            })
            .await
    }
}

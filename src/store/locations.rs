use crate::error::{StoreError, StoreResult};
use crate::path_validation::{path_key, validate_path};
use crate::store::atomic::JsonStore;
use crate::store::types::{LocationUpdate, TargetLocation, TARGET_LOCATIONS_DOC};

fn find_duplicate<'a>(
    locations: &'a [TargetLocation],
    path: &str,
    except_id: Option<&str>,
) -> Option<&'a TargetLocation> {
    let key = path_key(path);
    locations
        .iter()
        .filter(|l| Some(l.id.as_str()) != except_id)
        .find(|l| path_key(&l.path) == key)
}

fn check_input(name: &str, path: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidInput(
            "location name must not be empty".to_string(),
        ));
    }
    validate_path(path).map_err(StoreError::InvalidInput)
}

/// Apply one edit to `locations`, rejecting unknown ids and path collisions.
fn apply_update(
    locations: &mut [TargetLocation],
    update: LocationUpdate,
) -> StoreResult<TargetLocation> {
    check_input(&update.name, &update.path)?;
    if let Some(other) = find_duplicate(locations, &update.path, Some(&update.id)) {
        return Err(StoreError::DuplicatePath(other.path.clone()));
    }
    let location = locations
        .iter_mut()
        .find(|l| l.id == update.id)
        .ok_or_else(|| StoreError::NotFound(format!("target location {}", update.id)))?;
    location.name = update.name;
    location.path = update.path;
    if let Some(selected) = update.selected {
        location.selected = selected;
    }
    Ok(location.clone())
}

#[derive(Debug, Clone)]
pub struct TargetLocationStore {
    store: JsonStore,
}

impl TargetLocationStore {
    pub fn new(store: JsonStore) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Vec<TargetLocation> {
        self.store.read(TARGET_LOCATIONS_DOC, Vec::new()).await.data
    }

    pub async fn get(&self, id: &str) -> Option<TargetLocation> {
        self.list().await.into_iter().find(|l| l.id == id)
    }

    pub async fn selected(&self) -> Vec<TargetLocation> {
        self.list().await.into_iter().filter(|l| l.selected).collect()
    }

    /// Adds a new, unselected location. Paths are compared case-insensitively.
    pub async fn add(&self, name: &str, path: &str) -> StoreResult<TargetLocation> {
        check_input(name, path)?;
        let location = TargetLocation::new(name.trim(), path.trim());
        self.store
            .update(
                TARGET_LOCATIONS_DOC,
                Vec::new(),
                |locations: &mut Vec<TargetLocation>| {
                    if let Some(existing) = find_duplicate(locations, &location.path, None) {
                        return Err(StoreError::DuplicatePath(existing.path.clone()));
                    }
                    locations.push(location.clone());
                    Ok(location)
                },
            )
            .await
    }

    pub async fn update(&self, update: LocationUpdate) -> StoreResult<TargetLocation> {
        self.store
            .update(
                TARGET_LOCATIONS_DOC,
                Vec::new(),
                |locations: &mut Vec<TargetLocation>| apply_update(locations, update),
            )
            .await
    }

    /// All edits are persisted in one write, or none when any edit is rejected.
    pub async fn update_many(&self, updates: Vec<LocationUpdate>) -> StoreResult<Vec<TargetLocation>> {
        self.store
            .update(
                TARGET_LOCATIONS_DOC,
                Vec::new(),
                |locations: &mut Vec<TargetLocation>| {
                    updates
                        .into_iter()
                        .map(|update| apply_update(locations, update))
                        .collect()
                },
            )
            .await
    }

    pub async fn set_selected(&self, id: &str, selected: bool) -> StoreResult<TargetLocation> {
        self.store
            .update(
                TARGET_LOCATIONS_DOC,
                Vec::new(),
                |locations: &mut Vec<TargetLocation>| {
                    let location = locations
                        .iter_mut()
                        .find(|l| l.id == id)
                        .ok_or_else(|| StoreError::NotFound(format!("target location {}", id)))?;
                    location.selected = selected;
                    Ok(location.clone())
                },
            )
            .await
    }

    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.store
            .update(
                TARGET_LOCATIONS_DOC,
                Vec::new(),
                |locations: &mut Vec<TargetLocation>| {
                    let before = locations.len();
                    locations.retain(|l| l.id != id);
                    Ok(locations.len() < before)
                },
            )
            .await
    }
}

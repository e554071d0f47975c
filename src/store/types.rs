use crate::patterns::default_patterns;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const TARGET_LOCATIONS_DOC: &str = "targetLocations.json";
pub const PRESETS_DOC: &str = "presets.json";
pub const HISTORY_DOC: &str = "history.json";
pub const SETTINGS_DOC: &str = "settings.json";

/// Label shown for preset entries whose location no longer exists.
pub const UNKNOWN_TARGET: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetLocation {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub selected: bool,
}

impl TargetLocation {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            path: path.into(),
            selected: false,
        }
    }
}

/// Edit of an existing location. `selected: None` keeps the stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub selected: Option<bool>,
}

impl From<TargetLocation> for LocationUpdate {
    fn from(location: TargetLocation) -> Self {
        Self {
            id: location.id,
            name: location.name,
            path: location.path,
            selected: Some(location.selected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub target_ids: Vec<String>,
}

impl Preset {
    pub fn new(name: impl Into<String>, description: Option<String>, target_ids: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description,
            target_ids,
        }
    }
}

/// A preset entry resolved against the current locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTarget {
    pub id: String,
    pub name: String,
    pub path: String,
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyResult {
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Milliseconds spent on the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_diff: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub path: String,
}

impl From<&TargetLocation> for HistoryTarget {
    fn from(location: &TargetLocation) -> Self {
        Self {
            id: Some(location.id.clone()),
            name: location.name.clone(),
            path: location.path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: u64,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub target_locations: Vec<HistoryTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_results: Option<Vec<CopyResult>>,
}

impl HistoryEntry {
    pub fn succeeded(&self) -> bool {
        self.copy_results
            .as_ref()
            .map(|results| results.iter().all(|r| r.success))
            .unwrap_or(true)
    }
}

/// The user-editable part of a history entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryUpdate {
    #[serde(default)]
    pub description: Option<String>,
}

fn parse_version(version: &str) -> Option<u64> {
    let digits = version.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// `"v" + (1 + highest vN in history)`. Missing or malformed versions are ignored.
pub fn next_version(entries: &[HistoryEntry]) -> String {
    let max = entries
        .iter()
        .filter_map(|e| e.version.as_deref())
        .filter_map(parse_version)
        .max()
        .unwrap_or(0);
    format!("v{}", max.saturating_add(1))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub show_confirmation_before_copy: bool,
    pub create_backup_before_overwrite: bool,
    pub auto_check_source_changes: bool,
    pub history_retention_days: u32,
    pub dark_mode: bool,
    pub default_preset_id: Option<String>,
    pub backup_retention_count: u32,
    pub delete_backups_older_than_days: u32,
    pub enable_old_backup_deletion: bool,
    pub history_items_per_page: u32,
    pub remember_source_path: bool,
    pub last_source_path: Option<String>,
    pub file_patterns: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_confirmation_before_copy: true,
            create_backup_before_overwrite: true,
            auto_check_source_changes: true,
            history_retention_days: 30,
            dark_mode: false,
            default_preset_id: None,
            backup_retention_count: 10,
            delete_backups_older_than_days: 30,
            enable_old_backup_deletion: false,
            history_items_per_page: 10,
            remember_source_path: true,
            last_source_path: None,
            file_patterns: default_patterns(),
        }
    }
}

const NUMERIC_KEYS: &[&str] = &[
    "historyRetentionDays",
    "backupRetentionCount",
    "deleteBackupsOlderThanDays",
    "historyItemsPerPage",
];

/// Numbers and numeric strings become non-negative integers.
fn coerce_non_negative(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    Some(n.max(0.0).floor().min(f64::from(u32::MAX)) as u32)
}

fn same_kind(default: &Value, value: &Value) -> bool {
    matches!(
        (default, value),
        (Value::Bool(_), Value::Bool(_))
            | (Value::String(_), Value::String(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Object(_), Value::Object(_))
            | (Value::Null, Value::Null)
            | (Value::Null, Value::String(_))
    )
}

impl Settings {
    /// Merges a stored settings document over the defaults. Unknown keys are
    /// dropped; values of the wrong type fall back to the default.
    pub fn from_json(stored: Value) -> Self {
        let defaults = Settings::default();
        let Ok(Value::Object(mut merged)) = serde_json::to_value(&defaults) else {
            return defaults;
        };

        if let Value::Object(stored) = stored {
            for (key, value) in stored {
                let Some(default) = merged.get(&key) else {
                    continue;
                };
                let candidate = if NUMERIC_KEYS.contains(&key.as_str()) {
                    coerce_non_negative(&value).map(Value::from)
                } else if same_kind(default, &value) {
                    Some(value)
                } else {
                    None
                };
                let Some(candidate) = candidate else {
                    continue;
                };

                // Nested values are checked one key at a time so a bad entry
                // only resets its own key.
                let previous = merged.insert(key.clone(), candidate);
                if serde_json::from_value::<Settings>(Value::Object(merged.clone())).is_err() {
                    log::warn!("Ignoring invalid stored setting {}", key);
                    if let Some(previous) = previous {
                        merged.insert(key, previous);
                    }
                }
            }
        }

        match serde_json::from_value::<Settings>(Value::Object(merged)) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Stored settings are unusable, using defaults: {}", e);
                defaults
            }
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    pub fn items_per_page(&self) -> usize {
        self.history_items_per_page.max(1) as usize
    }
}

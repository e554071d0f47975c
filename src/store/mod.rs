pub mod atomic;
pub mod history;
pub mod lock_registry;
pub mod locations;
pub mod presets;
pub mod settings;
pub mod types;

pub use atomic::{JsonStore, ReadMetadata, ReadOutcome, StoreNotice, StoreOptions};
pub use history::{HistoryPage, HistoryStore};
pub use lock_registry::{KeyGuard, LockRegistry};
pub use locations::TargetLocationStore;
pub use presets::PresetStore;
pub use settings::SettingsStore;
pub use types::*;

pub mod cache;
pub mod debounce;
pub mod probe;

pub use cache::{AccessConfig, AccessibilityCache, MonitoredLocation};
pub use debounce::Debouncer;
pub use probe::{AccessProbe, PathAccess, PathAccessProbe};

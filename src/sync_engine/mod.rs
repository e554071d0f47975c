pub mod engine;
pub mod lock_probe;
pub mod retry;
pub mod types;

pub use engine::CopyEngine;
pub use lock_probe::{is_file_in_use, FileLockProbe, LockProbe};
pub use retry::{with_retry, RetryPolicy};
pub use types::{CopiedFile, CopyOptions, CopyOutcome, FileFailure, RetryOutcome};

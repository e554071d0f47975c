use serde::{Deserialize, Serialize};

use crate::error_codes;

/// A file copied during one engine invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CopiedFile {
    pub name: String,
    pub size: u64,
    /// The target was missing or differed from the source before the copy.
    #[serde(default)]
    pub has_diff: bool,
}

/// One per-file (or per-directory) problem recorded during a copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub file_name: Option<String>,
    pub message: String,
    pub code: Option<String>,
}

impl FileFailure {
    pub fn new(file_name: Option<&str>, message: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            file_name: file_name.map(|s| s.to_string()),
            message: message.into(),
            code: code.map(|s| s.to_string()),
        }
    }

    pub fn is_network_error(&self) -> bool {
        self.code
            .as_deref()
            .map(error_codes::is_network_error_code)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyOptions {
    pub create_dir_if_missing: bool,
    pub preserve_times: bool,
    pub verify_after_copy: bool,
    pub detect_changes: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            create_dir_if_missing: true,
            preserve_times: true,
            verify_after_copy: false,
            detect_changes: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyOutcome {
    pub success: bool,
    pub copied_files: Vec<CopiedFile>,
    pub error: Option<String>,
    #[serde(default)]
    pub failures: Vec<FileFailure>,
}

impl CopyOutcome {
    pub fn from_parts(copied_files: Vec<CopiedFile>, failures: Vec<FileFailure>) -> Self {
        let error = if failures.is_empty() {
            None
        } else {
            Some(
                failures
                    .iter()
                    .map(|f| f.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        Self {
            success: failures.is_empty(),
            copied_files,
            error,
            failures,
        }
    }

    /// The target directory is missing and the caller did not allow creating it.
    pub fn directory_not_exists() -> Self {
        Self {
            success: false,
            copied_files: Vec::new(),
            error: Some(error_codes::DIRECTORY_NOT_EXISTS.to_string()),
            failures: vec![FileFailure::new(
                None,
                error_codes::DIRECTORY_NOT_EXISTS,
                Some(error_codes::DIRECTORY_NOT_EXISTS),
            )],
        }
    }

    pub fn is_directory_missing(&self) -> bool {
        self.error.as_deref() == Some(error_codes::DIRECTORY_NOT_EXISTS)
    }

    /// Failed, and every recorded failure looks like a transient network error.
    pub fn is_retryable(&self) -> bool {
        !self.success
            && !self.failures.is_empty()
            && self.failures.iter().all(FileFailure::is_network_error)
    }

    pub fn bytes_copied(&self) -> u64 {
        self.copied_files.iter().map(|f| f.size).sum()
    }
}

/// Result of [`CopyEngine::copy_with_retry`](super::CopyEngine::copy_with_retry).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOutcome {
    pub outcome: CopyOutcome,
    pub attempts: u32,
    pub source_is_network: bool,
    pub target_is_network: bool,
    pub succeeded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_aggregates_errors() {
        let outcome = CopyOutcome::from_parts(
            vec![],
            vec![
                FileFailure::new(Some("a.mv.db"), "a failed", Some("EBUSY")),
                FileFailure::new(Some("b.mv.db"), "b failed", None),
            ],
        );
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("a failed; b failed"));
        assert!(!outcome.is_retryable());
    }

    #[test]
    fn test_outcome_without_failures_succeeds() {
        let outcome = CopyOutcome::from_parts(vec![], vec![]);
        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert!(!outcome.is_retryable());
    }

    #[test]
    fn test_network_only_failures_are_retryable() {
        let outcome = CopyOutcome::from_parts(
            vec![],
            vec![FileFailure::new(None, "share dropped", Some("ETIMEDOUT"))],
        );
        assert!(outcome.is_retryable());
    }

    #[test]
    fn test_directory_not_exists_is_final() {
        let outcome = CopyOutcome::directory_not_exists();
        assert!(outcome.is_directory_missing());
        assert!(!outcome.is_retryable());
    }
}

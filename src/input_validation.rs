//! Validation of user-supplied values before they reach the stores or the
//! copy engine.

use crate::path_validation::validate_path;
use crate::patterns::FilePatterns;
use anyhow::{bail, Result};

const MAX_PATTERNS: usize = 50;
const MAX_PATTERN_LENGTH: usize = 255;
const MAX_NAME_LENGTH: usize = 100;

/// Checks a copy pattern list and compiles it.
///
/// Patterns are file names where `*` is the only wildcard, so separators and
/// `..` are rejected outright.
pub fn validate_copy_patterns(patterns: &[String]) -> Result<FilePatterns> {
    if patterns.len() > MAX_PATTERNS {
        bail!(
            "Too many copy patterns: {} (max: {})",
            patterns.len(),
            MAX_PATTERNS
        );
    }

    let mut kept = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.len() > MAX_PATTERN_LENGTH {
            bail!(
                "Pattern too long: '{}' ({} chars, max: {})",
                trimmed.chars().take(20).collect::<String>(),
                trimmed.len(),
                MAX_PATTERN_LENGTH
            );
        }
        if trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
            bail!("Pattern must be a file name: '{}'", trimmed);
        }
        if trimmed.chars().any(char::is_control) {
            bail!("Pattern contains control characters");
        }
        kept.push(trimmed.to_string());
    }

    if kept.is_empty() {
        bail!("At least one copy pattern is required");
    }
    FilePatterns::new(&kept)
}

/// Names of target locations and presets.
pub fn validate_display_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        bail!("Name cannot be empty");
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        bail!(
            "Name too long: {} chars (max: {})",
            trimmed.chars().count(),
            MAX_NAME_LENGTH
        );
    }
    if trimmed.chars().any(char::is_control) {
        bail!("Name contains control characters");
    }
    Ok(())
}

/// Source and target paths given on the command line.
pub fn validate_path_argument(path: &str) -> Result<()> {
    if let Err(reason) = validate_path(path) {
        bail!("{}", reason);
    }
    if path.contains('|') || path.contains('`') {
        bail!("Path contains shell metacharacters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_copy_patterns_valid() {
        let patterns = vec!["*.mv.db".to_string(), " *.trace.db ".to_string(), "".to_string()];
        let compiled = validate_copy_patterns(&patterns).unwrap();
        assert_eq!(compiled.patterns(), ["*.mv.db", "*.trace.db"]);
        assert!(compiled.matches("configurations.mv.db"));
    }

    #[test]
    fn test_validate_copy_patterns_rejects_paths() {
        let result = validate_copy_patterns(&["../*.db".to_string()]);
        assert!(result.unwrap_err().to_string().contains("file name"));
        assert!(validate_copy_patterns(&["sub/*.db".to_string()]).is_err());
        assert!(validate_copy_patterns(&["a\0b".to_string()]).is_err());
    }

    #[test]
    fn test_validate_copy_patterns_limits() {
        let many: Vec<String> = (0..51).map(|i| format!("*.{}", i)).collect();
        assert!(validate_copy_patterns(&many).is_err());
        assert!(validate_copy_patterns(&["x".repeat(256)]).is_err());
        assert!(validate_copy_patterns(&["  ".to_string()]).is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Office NAS").is_ok());
        assert!(validate_display_name("사무실").is_ok());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name("tab\there").is_err());
        assert!(validate_display_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_path_argument() {
        assert!(validate_path_argument("/Users/test/db").is_ok());
        assert!(validate_path_argument("\\\\server\\share$\\db").is_ok());
        assert!(validate_path_argument("").is_err());
        assert!(validate_path_argument("/path\0null").is_err());
        assert!(validate_path_argument("/path | rm -rf /").is_err());
        assert!(validate_path_argument("/path`whoami`").is_err());
    }
}

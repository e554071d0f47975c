//! File-name patterns for selecting which files get copied.
//!
//! Only `*` is a wildcard (zero or more characters). Every other character,
//! including glob metacharacters like `?` or `[`, matches itself, and a
//! pattern must match the whole file name.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};

/// The two database files this tool exists to synchronize.
pub const DEFAULT_PATTERNS: &[&str] = &["*.mv.db", "*.trace.db"];

pub fn default_patterns() -> Vec<String> {
    DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect()
}

/// Rewrites a `*`-only pattern into glob syntax with everything else escaped.
fn escape_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => escaped.push('*'),
            '?' | '[' | ']' | '{' | '}' | ',' | '\\' | '!' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

fn build_glob(pattern: &str) -> Result<globset::Glob> {
    GlobBuilder::new(&escape_pattern(pattern))
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .with_context(|| format!("Invalid copy pattern '{pattern}'"))
}

/// Compiles a single pattern into a predicate over file names.
pub fn pattern_to_matcher(pattern: &str) -> Result<impl Fn(&str) -> bool> {
    let matcher: GlobMatcher = build_glob(pattern)?.compile_matcher();
    Ok(move |name: &str| matcher.is_match(name))
}

/// A compiled set of patterns; a name is selected if any pattern matches.
#[derive(Debug, Clone)]
pub struct FilePatterns {
    patterns: Vec<String>,
    set: GlobSet,
}

impl FilePatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder.add(build_glob(pattern)?);
            kept.push(pattern.to_string());
        }

        Ok(Self {
            patterns: kept,
            set: builder.build()?,
        })
    }

    pub fn defaults() -> Self {
        // The default patterns are plain literals plus `*`, so this cannot fail.
        Self::new(DEFAULT_PATTERNS).unwrap_or_else(|_| Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.set.is_match(file_name)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns_select_database_files() {
        let patterns = FilePatterns::defaults();
        assert!(patterns.matches("configurations.mv.db"));
        assert!(patterns.matches("configurations.trace.db"));
        assert!(!patterns.matches("readme.txt"));
        assert!(!patterns.matches("configurations.mv.db.bak"));
    }

    #[test]
    fn test_single_pattern_matcher() {
        let is_mv = pattern_to_matcher("*.mv.db").unwrap();
        assert!(is_mv("configurations.mv.db"));
        assert!(!is_mv("configurations.trace.db"));
        // `.` is literal, not "any character".
        assert!(!is_mv("configurationsXmvXdb"));
    }

    #[test]
    fn test_star_matches_empty_and_anything() {
        let all = pattern_to_matcher("*").unwrap();
        assert!(all(""));
        assert!(all("anything at all"));

        let prefix = pattern_to_matcher("data*").unwrap();
        assert!(prefix("data"));
        assert!(prefix("data.mv.db"));
        assert!(!prefix("mydata"));
    }

    #[test]
    fn test_other_glob_metacharacters_are_literal() {
        let question = pattern_to_matcher("file?.db").unwrap();
        assert!(question("file?.db"));
        assert!(!question("file1.db"));

        let bracket = pattern_to_matcher("[ab].db").unwrap();
        assert!(bracket("[ab].db"));
        assert!(!bracket("a.db"));

        let braces = pattern_to_matcher("{a,b}.db").unwrap();
        assert!(braces("{a,b}.db"));
        assert!(!braces("a.db"));
    }

    #[test]
    fn test_match_is_anchored() {
        let patterns = FilePatterns::new(&["*.mv.db"]).unwrap();
        assert!(!patterns.matches("configurations.mv.db.old"));
        assert!(!patterns.matches("x.mv.dbx"));
    }

    #[test]
    fn test_empty_pattern_list_matches_nothing() {
        let patterns = FilePatterns::new::<&str>(&[]).unwrap();
        assert!(patterns.is_empty());
        assert!(!patterns.matches("configurations.mv.db"));
    }
}

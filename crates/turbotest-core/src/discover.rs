//! Test file discovery.
//!
//! Patterns are globs over the file *name*: a leading `**/` is dropped since the
//! recursive walk already covers every depth.

use regex_lite::Regex;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Patterns used when none are configured.
pub const DEFAULT_TEST_PATTERNS: &[&str] = &["**/*.spec.ts", "**/*.spec.js"];

/// Directories never descended into.
pub const EXCLUDE_DIRS: &[&str] = &["node_modules", ".git", "dist"];

/// Convert a file-name glob into an anchored regex.
///
/// `**` matches anything, `*` matches anything but `/`; every other regex
/// metacharacter is literal.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex_lite::Error> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                re.push_str(".*");
            }
            '*' => re.push_str("[^/]*"),
            '.' | '+' | '?' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\' => {
                re.push('\\');
                re.push(c);
            }
            _ => re.push(c),
        }
    }

    re.push('$');
    Regex::new(&re)
}

/// Compiled set of test file patterns (logical OR).
#[derive(Debug, Clone)]
pub struct TestPatterns {
    matchers: Vec<Regex>,
}

impl Default for TestPatterns {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_PATTERNS)
    }
}

impl TestPatterns {
    /// Compile `patterns`. Invalid patterns are logged and skipped.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let matchers = patterns
            .iter()
            .filter_map(|pattern| {
                let pattern = pattern.as_ref();
                let simplified = pattern.strip_prefix("**/").unwrap_or(pattern);
                match glob_to_regex(simplified) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(pattern, error = %e, "Ignoring invalid test pattern");
                        None
                    }
                }
            })
            .collect();
        Self { matchers }
    }

    /// Check a bare file name against the patterns.
    #[must_use]
    pub fn matches_name(&self, file_name: &str) -> bool {
        self.matchers.iter().any(|re| re.is_match(file_name))
    }

    /// Check whether `path` names a test file outside any excluded directory
    /// below `root`.
    #[must_use]
    pub fn matches_path(&self, root: &Path, path: &Path) -> bool {
        if is_in_excluded_dir(path.strip_prefix(root).unwrap_or(path)) {
            return false;
        }
        path.file_name()
            .and_then(OsStr::to_str)
            .is_some_and(|name| self.matches_name(name))
    }
}

fn is_excluded_name(name: &OsStr) -> bool {
    EXCLUDE_DIRS.iter().any(|excluded| name == OsStr::new(excluded))
}

/// Check if a path lies inside an excluded directory.
fn is_in_excluded_dir(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    parent.components().any(|c| match c {
        Component::Normal(name) => is_excluded_name(name),
        _ => false,
    })
}

/// Find test files under `root` matching `patterns`.
///
/// Results follow directory-listing order, depth first. A missing or
/// non-directory root yields nothing; unreadable directories are logged and
/// skipped without aborting the scan.
#[must_use]
pub fn find_test_files<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Vec<PathBuf> {
    find_with(root, &TestPatterns::new(patterns))
}

/// Like [`find_test_files`] with precompiled patterns.
#[must_use]
pub fn find_with(root: &Path, patterns: &TestPatterns) -> Vec<PathBuf> {
    if !root.is_dir() {
        debug!(root = %root.display(), "Test root is not a directory");
        return Vec::new();
    }

    let mut results = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !(e.file_type().is_dir() && is_excluded_name(e.file_name()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                warn!(path = %path, error = %e, "Error scanning directory");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| patterns.matches_name(name))
        {
            results.push(entry.into_path());
        }
    }

    results
}

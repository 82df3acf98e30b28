//! Lexical extraction of suite and case declarations.
//!
//! This is a scan over raw text, not a parse: nesting is ignored and a
//! declaration-shaped string inside a comment or literal is still reported.
//! Suites are `describe(<quoted>`, cases are `it(<quoted>` or `test(<quoted>`.

use regex_lite::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;
use tracing::warn;

/// Any of the three JS quote styles; the name cannot contain its own quote.
const QUOTED_NAME: &str = r#"\s*\(\s*(?:'([^']*)'|"([^"]*)"|`([^`]*)`)"#;

/// A declaration found in source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    /// The quoted title.
    pub name: String,
    /// Byte offset of the declaring keyword.
    pub offset: usize,
}

/// Declarations found in one file, each list in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFile {
    pub suites: Vec<Declaration>,
    pub cases: Vec<Declaration>,
}

impl ParsedFile {
    /// Check if nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty() && self.cases.is_empty()
    }
}

fn suite_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"\bdescribe{QUOTED_NAME}")).expect("suite pattern is valid")
    })
}

fn case_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"\b(?:it|test){QUOTED_NAME}")).expect("case pattern is valid")
    })
}

fn scan(re: &Regex, text: &str) -> Vec<Declaration> {
    re.captures_iter(text)
        .filter_map(|caps: Captures<'_>| {
            let whole = caps.get(0)?;
            let name = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
            Some(Declaration {
                name: name.as_str().to_string(),
                offset: whole.start(),
            })
        })
        .collect()
}

/// Scan `text` for suite and case declarations.
#[must_use]
pub fn parse_file(text: &str) -> ParsedFile {
    ParsedFile {
        suites: scan(suite_regex(), text),
        cases: scan(case_regex(), text),
    }
}

/// Read and scan a file. Unreadable files are logged and yield nothing.
#[must_use]
pub fn parse_file_at(path: &Path) -> (String, ParsedFile) {
    match turbotest_util::fs::read_to_string_lossy(path) {
        Ok(text) => {
            let parsed = parse_file(&text);
            (text, parsed)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read test file");
            (String::new(), ParsedFile::default())
        }
    }
}
